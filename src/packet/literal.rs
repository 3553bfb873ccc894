//! Literal data packet header (RFC 4880 §5.9).

use std::io::Read;

use crate::error::{PgpkitError, Result};

/// Filename marking data that should not be written to disk
pub const CONSOLE_FILENAME: &str = "_CONSOLE";

/// Format octet of a literal data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    #[default]
    Binary,
    Text,
    Utf8,
}

impl DataFormat {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b't' => Self::Text,
            b'u' => Self::Utf8,
            // 'b', plus the obsolete local-mode octets 'l' and '1'
            _ => Self::Binary,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Binary => b'b',
            Self::Text => b't',
            Self::Utf8 => b'u',
        }
    }

    pub fn is_text(self) -> bool {
        !matches!(self, Self::Binary)
    }
}

/// Everything in a literal data packet before the data itself
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiteralHeader {
    pub format: DataFormat,
    pub filename: String,
    pub date: u32,
}

impl LiteralHeader {
    pub fn new(format: DataFormat, filename: impl Into<String>, date: u32) -> Self {
        Self {
            format,
            filename: filename.into(),
            date,
        }
    }

    /// Reads the header from the start of a literal packet body
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut head = [0u8; 2];
        reader
            .read_exact(&mut head)
            .map_err(|_| PgpkitError::packet("truncated literal data header"))?;
        let mut name = vec![0u8; head[1] as usize];
        let mut date = [0u8; 4];
        reader
            .read_exact(&mut name)
            .and_then(|_| reader.read_exact(&mut date))
            .map_err(|_| PgpkitError::packet("truncated literal data header"))?;
        Ok(Self {
            format: DataFormat::from_byte(head[0]),
            filename: String::from_utf8_lossy(&name).into_owned(),
            date: u32::from_be_bytes(date),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Filenames are limited to one length octet
        let mut name = self.filename.as_bytes();
        if name.len() > 255 {
            name = &name[..255];
        }
        let mut out = Vec::with_capacity(6 + name.len());
        out.push(self.format.to_byte());
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.extend_from_slice(&self.date.to_be_bytes());
        out
    }

    pub fn is_console(&self) -> bool {
        self.filename == CONSOLE_FILENAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bytes() {
        let header = LiteralHeader::new(DataFormat::Text, "notes.txt", 0x01020304);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..2], &[b't', 9]);
        assert_eq!(&bytes[bytes.len() - 4..], &[1, 2, 3, 4]);

        let mut input: &[u8] = &bytes;
        assert_eq!(LiteralHeader::read_from(&mut input).unwrap(), header);
    }

    #[test]
    fn test_truncated_header() {
        let mut input: &[u8] = &[b'b', 5, b'a'];
        assert!(LiteralHeader::read_from(&mut input).is_err());
    }
}
