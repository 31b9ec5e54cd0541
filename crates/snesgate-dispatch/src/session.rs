/*!
 * Client sessions.
 *
 * A session is one client connection's view of the dispatcher: an optional
 * name and at most one attached device. [`Session::execute`] turns a
 * [`ClientRequest`] into dispatcher and device calls.
 */
use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

use snesgate_devices::{ControlCommand, FileCommand};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::protocol::{parse_hex, ClientReply, ClientRequest, Opcode};
use crate::worker::DeviceHandle;

/// State of one client connection
#[derive(Debug, Default)]
pub struct Session {
    name: Option<String>,
    device: Option<DeviceHandle>,
}

impl Session {
    /// Create an unattached session
    pub fn new() -> Self {
        Self::default()
    }

    /// Name given by the client, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The attached device, if any
    pub fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    fn attached(&self, opcode: Opcode) -> Result<&DeviceHandle> {
        self.device
            .as_ref()
            .ok_or_else(|| Error::invalid_request(format!("{:?} needs an attached device", opcode)))
    }

    /// Run one request. `payload` carries the binary frame that follows a
    /// `PutAddress` request.
    pub async fn execute(
        &mut self,
        dispatcher: &Dispatcher,
        request: &ClientRequest,
        payload: Option<Bytes>,
    ) -> Result<ClientReply> {
        debug!("{}: {:?}", self.label(), request.opcode);
        match request.opcode {
            Opcode::DeviceList => Ok(ClientReply::Results(dispatcher.device_list().await)),
            Opcode::Attach => {
                let handle = dispatcher.attach(request.operand(0)?).await?;
                info!("{} attached to {}", self.label(), handle.name());
                self.device = Some(handle);
                Ok(ClientReply::Empty)
            }
            Opcode::Name => {
                self.name = Some(request.operand(0)?.to_string());
                Ok(ClientReply::Empty)
            }
            Opcode::AppVersion => Ok(ClientReply::Results(vec![format!(
                "snesgate-{}",
                crate::VERSION
            )])),
            Opcode::Info => {
                let handle = self.attached(request.opcode)?;
                let info = handle.info().await?;
                let mut results = vec![info.version, handle.name().to_string(), info.running];
                results.extend(info.flags.iter().map(ToString::to_string));
                Ok(ClientReply::Results(results))
            }
            Opcode::GetAddress => {
                let handle = self.attached(request.opcode)?;
                let pairs = request.address_pairs(dispatcher.max_transfer())?;
                let mut data = BytesMut::new();
                for (address, size) in pairs {
                    data.extend_from_slice(&handle.get_address(request.space, address, size).await?);
                }
                Ok(ClientReply::Binary(data.freeze()))
            }
            Opcode::PutAddress => {
                let handle = self.attached(request.opcode)?;
                let pairs = request.address_pairs(dispatcher.max_transfer())?;
                let payload = payload.unwrap_or_default();
                let needed: usize = pairs.iter().map(|(_, size)| *size as usize).sum();
                if payload.len() < needed {
                    return Err(Error::invalid_request(format!(
                        "PutAddress needs {} bytes, got {}",
                        needed,
                        payload.len()
                    )));
                }
                let mut offset = 0;
                for (address, size) in pairs {
                    let end = offset + size as usize;
                    handle
                        .put_address(request.space, address, payload.slice(offset..end))
                        .await?;
                    offset = end;
                }
                Ok(ClientReply::Empty)
            }
            Opcode::Reset => self.control(request, ControlCommand::Reset).await,
            Opcode::Menu => self.control(request, ControlCommand::Menu).await,
            Opcode::Boot => {
                let command = ControlCommand::Boot(request.operand(0)?.to_string());
                self.control(request, command).await
            }
            Opcode::List => {
                let listing = self
                    .file(request, FileCommand::List(request.operand(0)?.to_string()))
                    .await?;
                let entries = String::from_utf8_lossy(&listing)
                    .lines()
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(ClientReply::Results(entries))
            }
            Opcode::GetFile => {
                let data = self
                    .file(request, FileCommand::Get(request.operand(0)?.to_string()))
                    .await?;
                Ok(ClientReply::Binary(data))
            }
            Opcode::PutFile => {
                let command = FileCommand::Put {
                    path: request.operand(0)?.to_string(),
                    size: parse_hex(request.operand(1)?)?,
                };
                self.file(request, command).await?;
                Ok(ClientReply::Empty)
            }
            Opcode::Rename => {
                let command = FileCommand::Rename {
                    from: request.operand(0)?.to_string(),
                    to: request.operand(1)?.to_string(),
                };
                self.file(request, command).await?;
                Ok(ClientReply::Empty)
            }
            Opcode::Remove => {
                let command = FileCommand::Remove(request.operand(0)?.to_string());
                self.file(request, command).await?;
                Ok(ClientReply::Empty)
            }
            Opcode::MakeDir => {
                let command = FileCommand::MakeDir(request.operand(0)?.to_string());
                self.file(request, command).await?;
                Ok(ClientReply::Empty)
            }
        }
    }

    async fn control(&self, request: &ClientRequest, command: ControlCommand) -> Result<ClientReply> {
        self.attached(request.opcode)?.control_command(command).await?;
        Ok(ClientReply::Empty)
    }

    async fn file(&self, request: &ClientRequest, command: FileCommand) -> Result<Bytes> {
        self.attached(request.opcode)?.file_command(command).await
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use snesgate_core::config::DispatcherConfig;

    use crate::testing::{FakeFactory, Script, ScriptedDevice};

    fn dispatcher(device: std::sync::Arc<ScriptedDevice>) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        dispatcher.register_factory(Box::new(FakeFactory::new(device)));
        dispatcher
    }

    async fn attach(dispatcher: &Dispatcher, session: &mut Session) {
        let request = ClientRequest::new(Opcode::Attach, ["Scripted"]);
        assert_eq!(
            session.execute(dispatcher, &request, None).await.unwrap(),
            ClientReply::Empty
        );
    }

    #[tokio::test]
    async fn test_unattached_session() {
        let dispatcher = dispatcher(ScriptedDevice::new("Scripted", Script::Immediate));
        let mut session = Session::new();

        let list = ClientRequest::from_json(r#"{"Opcode":"DeviceList"}"#).unwrap();
        let reply = session.execute(&dispatcher, &list, None).await.unwrap();
        assert_eq!(reply.to_json().unwrap().unwrap(), r#"{"Results":["Scripted"]}"#);

        let name = ClientRequest::new(Opcode::Name, ["tracker"]);
        session.execute(&dispatcher, &name, None).await.unwrap();
        assert_eq!(session.name(), Some("tracker"));

        let read = ClientRequest::new(Opcode::GetAddress, ["F50000", "1"]);
        assert!(matches!(
            session.execute(&dispatcher, &read, None).await,
            Err(Error::InvalidRequest(_))
        ));

        let version = ClientRequest::new(Opcode::AppVersion, Vec::<String>::new());
        let reply = session.execute(&dispatcher, &version, None).await.unwrap();
        assert_eq!(
            reply,
            ClientReply::Results(vec![format!("snesgate-{}", crate::VERSION)])
        );
    }

    #[tokio::test]
    async fn test_multi_range_read() {
        let dispatcher = dispatcher(ScriptedDevice::new("Scripted", Script::Delayed));
        let mut session = Session::new();
        attach(&dispatcher, &mut session).await;
        assert_eq!(session.device().map(DeviceHandle::name), Some("Scripted"));

        let read = ClientRequest::new(Opcode::GetAddress, ["F50010", "2", "E00000", "3"]);
        let reply = session.execute(&dispatcher, &read, None).await.unwrap();
        assert_eq!(
            reply,
            ClientReply::Binary(Bytes::from_static(&[0x10, 0x11, 0x00, 0x01, 0x02]))
        );
    }

    #[tokio::test]
    async fn test_multi_range_write() {
        let device = ScriptedDevice::new("Scripted", Script::Immediate);
        let dispatcher = dispatcher(device.clone());
        let mut session = Session::new();
        attach(&dispatcher, &mut session).await;

        let write = ClientRequest::new(Opcode::PutAddress, ["F50000", "2", "E00010", "1"]);
        let reply = session
            .execute(&dispatcher, &write, Some(Bytes::from_static(&[1, 2, 3])))
            .await
            .unwrap();
        assert_eq!(reply, ClientReply::Empty);
        assert_eq!(device.log(), vec!["write SNES f50000 2", "write SNES e00010 1"]);

        assert!(matches!(
            session
                .execute(&dispatcher, &write, Some(Bytes::from_static(&[1])))
                .await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_transfer_is_rejected() {
        let device = ScriptedDevice::new("Scripted", Script::Immediate);
        let dispatcher = dispatcher(device.clone());
        let mut session = Session::new();
        attach(&dispatcher, &mut session).await;

        let read = ClientRequest::new(Opcode::GetAddress, ["7E0000", "FFFFFFFF"]);
        assert!(matches!(
            session.execute(&dispatcher, &read, None).await,
            Err(Error::InvalidRequest(_))
        ));
        let write = ClientRequest::new(Opcode::PutAddress, ["F50000", "1000001"]);
        assert!(matches!(
            session.execute(&dispatcher, &write, None).await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(device.log().is_empty());
    }

    #[tokio::test]
    async fn test_info_results() {
        let dispatcher = dispatcher(ScriptedDevice::new("Scripted", Script::Immediate));
        let mut session = Session::new();
        attach(&dispatcher, &mut session).await;

        let info = ClientRequest::new(Opcode::Info, Vec::<String>::new());
        let reply = session.execute(&dispatcher, &info, None).await.unwrap();
        assert_eq!(
            reply,
            ClientReply::Results(vec![
                "0.1".to_string(),
                "Scripted".to_string(),
                "scripted.sfc".to_string(),
                "NO_FILE_CMD".to_string(),
                "NO_CONTROL_CMD".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn test_file_and_control_commands() {
        let plain = dispatcher(ScriptedDevice::new("Scripted", Script::Immediate));
        let mut session = Session::new();
        attach(&plain, &mut session).await;

        let list = ClientRequest::new(Opcode::List, ["/"]);
        assert_eq!(
            session.execute(&plain, &list, None).await.unwrap(),
            ClientReply::Results(Vec::new())
        );
        let reset = ClientRequest::new(Opcode::Reset, Vec::<String>::new());
        assert!(matches!(
            session.execute(&plain, &reset, None).await,
            Err(Error::Unsupported(_))
        ));

        let device = ScriptedDevice::with_commands("Scripted", Script::Delayed);
        let capable = dispatcher(device.clone());
        let mut session = Session::new();
        attach(&capable, &mut session).await;

        assert_eq!(
            session.execute(&capable, &list, None).await.unwrap(),
            ClientReply::Results(vec!["a.sfc".to_string(), "b.sfc".to_string()])
        );
        let boot = ClientRequest::new(Opcode::Boot, ["/games/a.sfc"]);
        session.execute(&capable, &boot, None).await.unwrap();
        let put = ClientRequest::new(Opcode::PutFile, ["/b.sfc", "200"]);
        session.execute(&capable, &put, None).await.unwrap();

        assert_eq!(
            device.log(),
            vec![
                r#"file List("/")"#,
                r#"control Boot("/games/a.sfc")"#,
                r#"file Put { path: "/b.sfc", size: 512 }"#,
            ]
        );
    }
}
