/*!
 * Uniform client request and reply types.
 *
 * Requests arrive as JSON text frames:
 *
 * ```json
 * {"Opcode": "GetAddress", "Space": "SNES", "Operands": ["F50000", "10"]}
 * ```
 *
 * Text replies carry a `Results` array. Memory and file contents go back as
 * raw binary frames.
 */
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use snesgate_devices::AddressSpace;

use crate::error::{Error, Result};

/// Command identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// List every device the factories can see
    DeviceList,
    /// Bind the session to a device
    Attach,
    /// Name the session
    Name,
    /// Gateway version
    AppVersion,
    /// Device info snapshot
    Info,
    /// Read memory
    GetAddress,
    /// Write memory
    PutAddress,
    /// Reset the console
    Reset,
    /// Return to the menu
    Menu,
    /// Boot a ROM
    Boot,
    /// List a directory
    List,
    /// Download a file
    GetFile,
    /// Upload a file
    PutFile,
    /// Rename a file
    Rename,
    /// Delete a file
    Remove,
    /// Create a directory
    MakeDir,
}

/// One client request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientRequest {
    /// What to do
    pub opcode: Opcode,
    /// Address space for memory commands
    #[serde(default = "default_space")]
    pub space: AddressSpace,
    /// Positional arguments
    #[serde(default)]
    pub operands: Vec<String>,
}

fn default_space() -> AddressSpace {
    AddressSpace::Snes
}

impl ClientRequest {
    /// Build a request
    pub fn new<I, S>(opcode: Opcode, operands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            opcode,
            space: AddressSpace::Snes,
            operands: operands.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a JSON text frame
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Operand at `index`
    pub fn operand(&self, index: usize) -> Result<&str> {
        self.operands.get(index).map(String::as_str).ok_or_else(|| {
            Error::invalid_request(format!("{:?} needs operand {}", self.opcode, index + 1))
        })
    }

    /// `(address, size)` pairs from hex operands. The sizes together may
    /// not exceed `max_transfer` bytes.
    pub fn address_pairs(&self, max_transfer: u32) -> Result<Vec<(u32, u32)>> {
        if self.operands.is_empty() || self.operands.len() % 2 != 0 {
            return Err(Error::invalid_request(format!(
                "{:?} needs address and size pairs",
                self.opcode
            )));
        }
        let pairs = self
            .operands
            .chunks(2)
            .map(|pair| Ok((parse_hex(&pair[0])?, parse_hex(&pair[1])?)))
            .collect::<Result<Vec<_>>>()?;

        let total: u64 = pairs.iter().map(|(_, size)| u64::from(*size)).sum();
        if total > u64::from(max_transfer) {
            return Err(Error::invalid_request(format!(
                "{:?} covers {} bytes, the limit is {}",
                self.opcode, total, max_transfer
            )));
        }
        Ok(pairs)
    }
}

/// Parse a hex operand, with or without `0x`
pub fn parse_hex(text: &str) -> Result<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16)
        .map_err(|_| Error::invalid_request(format!("{:?} is not a hex number", text)))
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientReply {
    /// A JSON `Results` array
    Results(Vec<String>),
    /// Raw bytes
    Binary(Bytes),
    /// No reply is sent
    Empty,
}

#[derive(Serialize)]
struct ResultsFrame<'a> {
    #[serde(rename = "Results")]
    results: &'a [String],
}

impl ClientReply {
    /// JSON text frame for `Results` replies
    pub fn to_json(&self) -> Result<Option<String>> {
        match self {
            ClientReply::Results(results) => Ok(Some(serde_json::to_string(&ResultsFrame {
                results,
            })?)),
            _ => Ok(None),
        }
    }
}
