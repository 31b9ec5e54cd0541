/*!
 * RetroArch network command wire format.
 *
 * Commands are single plain-text datagrams of space separated tokens.
 * Addresses are lowercase hex without prefix, read sizes are decimal and
 * write payloads are space separated hex bytes:
 *
 * ```text
 * >> READ_CORE_RAM 200 4
 * << READ_CORE_RAM 200 de ad be ef
 * << READ_CORE_RAM 200 -1
 * >> WRITE_CORE_RAM 200 de ad
 * ```
 *
 * Writes and unknown commands get no reply.
 */
use std::fmt::Write as _;

/// Memory read command
pub const READ_CORE_RAM: &str = "READ_CORE_RAM";
/// Memory write command
pub const WRITE_CORE_RAM: &str = "WRITE_CORE_RAM";
/// Version probe
pub const VERSION: &str = "VERSION";
/// Payload token meaning "no data available at this address"
pub const SENTINEL: &str = "-1";
/// Largest payload the backend returns for one read request
pub const MAX_CHUNK: u32 = 78;

/// Format a read request
pub fn read_request(address: u32, size: u32) -> String {
    format!("{} {:x} {}", READ_CORE_RAM, address, size)
}

/// Format a write request
pub fn write_request(address: u32, data: &[u8]) -> String {
    let mut out = format!("{} {:x}", WRITE_CORE_RAM, address);
    for byte in data {
        let _ = write!(out, " {:02x}", byte);
    }
    out
}

/// Decoded reply to a `READ_CORE_RAM` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadReply {
    /// Memory contents at `address`
    Data {
        /// Address echoed by the backend
        address: u32,
        /// Decoded payload
        bytes: Vec<u8>,
    },
    /// The backend answered with the sentinel
    Unavailable {
        /// Address echoed by the backend
        address: u32,
    },
    /// The reply does not have the expected shape
    Malformed(String),
}

/// Parse a reply datagram to a read request
///
/// The payload starts at the third token. It may be a single contiguous hex
/// string or one token per byte; both are concatenated before decoding.
pub fn parse_read_reply(datagram: &[u8]) -> ReadReply {
    let text = match std::str::from_utf8(datagram) {
        Ok(text) => text,
        Err(_) => return ReadReply::Malformed("reply is not valid UTF-8".to_string()),
    };

    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 3 {
        return ReadReply::Malformed(format!(
            "expected at least 3 tokens, got {}",
            tokens.len()
        ));
    }
    if tokens[0] != READ_CORE_RAM {
        return ReadReply::Malformed(format!("unexpected reply command {:?}", tokens[0]));
    }
    let address = match u32::from_str_radix(tokens[1], 16) {
        Ok(address) => address,
        Err(_) => return ReadReply::Malformed(format!("bad reply address {:?}", tokens[1])),
    };

    if tokens[2] == SENTINEL {
        return ReadReply::Unavailable { address };
    }

    match hex::decode(tokens[2..].concat()) {
        Ok(bytes) => ReadReply::Data { address, bytes },
        Err(e) => ReadReply::Malformed(format!("bad hex payload: {}", e)),
    }
}

/// Whether a reply to the discovery memory probe shows memory access works
pub fn probe_reply_has_memory(datagram: &[u8]) -> bool {
    let trimmed = String::from_utf8_lossy(datagram);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() || trimmed == SENTINEL {
        return false;
    }
    matches!(parse_read_reply(trimmed.as_bytes()), ReadReply::Data { .. })
}

/// Extract the version string from a reply to [`VERSION`]
pub fn parse_version(datagram: &[u8]) -> String {
    String::from_utf8_lossy(datagram).trim().to_string()
}
