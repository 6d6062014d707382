//! Wire grammar for the upload header
//!
//! One upload per connection:
//! `<senderId:ASCII decimal> '|' <fileName:UTF-8, no NUL> 0x00 <payload until EOF>`
//! There is no payload length field; the peer closing its write side marks
//! the end of the upload.

use anyhow::{bail, Context, Result};

/// Byte that terminates the header text on the wire.
pub const HEADER_TERMINATOR: u8 = 0x00;

/// Separator between the sender id and the file name.
pub const HEADER_SEPARATOR: char = '|';

/// Maximum bytes scanned for the terminator before the header is declared
/// malformed. Bounds the damage a silent or hostile peer can do.
pub const MAX_HEADER_LEN: usize = 1024;

/// Chunk size used when draining the payload off the socket.
pub const PAYLOAD_CHUNK: usize = 64 * 1024;

/// Parsed upload header: which sender the upload belongs to and the file
/// name it was submitted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHeader {
    pub sender_id: u64,
    pub file_name: String,
}

impl UploadHeader {
    /// Parse the header text (the bytes before the terminator). Splits on
    /// the first separator only, so file names may themselves contain `|`.
    pub fn parse(text: &str) -> Result<Self> {
        let (id, name) = text
            .split_once(HEADER_SEPARATOR)
            .context("header missing '|' separator")?;
        let sender_id = id
            .parse::<u64>()
            .with_context(|| format!("sender id {:?} is not a non-negative integer", id))?;
        if name.is_empty() {
            bail!("empty file name");
        }
        Ok(UploadHeader {
            sender_id,
            file_name: name.to_string(),
        })
    }

    /// Encode for the wire, terminator included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.file_name.contains('\0') {
            bail!("file name contains NUL");
        }
        let text = format!("{}{}{}", self.sender_id, HEADER_SEPARATOR, self.file_name);
        if text.len() > MAX_HEADER_LEN {
            bail!("header exceeds {} bytes", MAX_HEADER_LEN);
        }
        let mut bytes = text.into_bytes();
        bytes.push(HEADER_TERMINATOR);
        Ok(bytes)
    }
}
