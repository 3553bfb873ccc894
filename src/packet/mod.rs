//! OpenPGP packet framing (RFC 4880 §4).
//!
//! Both old-format and new-format packet headers are read, including partial
//! body lengths and the old-format indeterminate length. Buffered packets are
//! always written with new-format headers; streamed packets use partial body
//! lengths (see [`stream`]).

use std::io::{self, Read, Write};

use crate::error::{PgpkitError, Result};
use crate::validation::Validator;

pub mod canonical;
pub mod cursor;
pub mod key;
pub mod literal;
pub mod session;
pub mod signature;
pub mod stream;

pub use key::{PublicKeyPacket, SecretKeyPacket, UnlockedKey};
pub use literal::{DataFormat, LiteralHeader};
pub use session::{PublicKeyEncryptedSessionKey, SessionKey, SymmetricKeyEncryptedSessionKey};
pub use signature::{OnePassSignature, SignaturePacket, SignatureType, Subpacket};

/// PGP packet types defined in RFC 4880
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Public-Key Encrypted Session Key Packet
    PublicKeyEncryptedSessionKey = 1,
    /// Signature Packet
    Signature = 2,
    /// Symmetric-Key Encrypted Session Key Packet
    SymmetricKeyEncryptedSessionKey = 3,
    /// One-Pass Signature Packet
    OnePassSignature = 4,
    /// Secret-Key Packet
    SecretKey = 5,
    /// Public-Key Packet
    PublicKey = 6,
    /// Secret-Subkey Packet
    SecretSubkey = 7,
    /// Compressed Data Packet
    CompressedData = 8,
    /// Symmetrically Encrypted Data Packet
    SymmetricallyEncryptedData = 9,
    /// Marker Packet
    Marker = 10,
    /// Literal Data Packet
    LiteralData = 11,
    /// Trust Packet
    Trust = 12,
    /// User ID Packet
    UserId = 13,
    /// Public-Subkey Packet
    PublicSubkey = 14,
    /// User Attribute Packet
    UserAttribute = 17,
    /// Sym. Encrypted and Integrity Protected Data Packet
    SymEncryptedIntegrityProtectedData = 18,
    /// Modification Detection Code Packet
    ModificationDetectionCode = 19,
}

impl PacketType {
    /// Convert packet type to byte value
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Convert byte value to packet type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::PublicKeyEncryptedSessionKey),
            2 => Some(Self::Signature),
            3 => Some(Self::SymmetricKeyEncryptedSessionKey),
            4 => Some(Self::OnePassSignature),
            5 => Some(Self::SecretKey),
            6 => Some(Self::PublicKey),
            7 => Some(Self::SecretSubkey),
            8 => Some(Self::CompressedData),
            9 => Some(Self::SymmetricallyEncryptedData),
            10 => Some(Self::Marker),
            11 => Some(Self::LiteralData),
            12 => Some(Self::Trust),
            13 => Some(Self::UserId),
            14 => Some(Self::PublicSubkey),
            17 => Some(Self::UserAttribute),
            18 => Some(Self::SymEncryptedIntegrityProtectedData),
            19 => Some(Self::ModificationDetectionCode),
            _ => None,
        }
    }
}

/// Length of a packet body as declared by its header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    Fixed(u32),
    /// First chunk of a partial-length body; more length octets follow it
    Partial(u32),
    /// Old-format length type 3: the body runs to the end of the input
    Indeterminate,
}

/// PGP packet header format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Raw packet tag
    pub tag: u8,
    /// Body length
    pub length: BodyLength,
    /// Whether this uses new packet format
    pub new_format: bool,
}

fn read_byte<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn read_be<R: Read + ?Sized>(reader: &mut R, len: usize) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf[4 - len..])?;
    Ok(u32::from_be_bytes(buf))
}

/// Reads new-format length octets, starting with `first`
fn read_new_length<R: Read + ?Sized>(reader: &mut R, first: u8) -> io::Result<BodyLength> {
    Ok(match first {
        0..=191 => BodyLength::Fixed(first as u32),
        192..=223 => {
            let second = read_be(reader, 1)?;
            BodyLength::Fixed(((first as u32 - 192) << 8) + second + 192)
        }
        224..=254 => BodyLength::Partial(1 << (first & 0x1F)),
        255 => BodyLength::Fixed(read_be(reader, 4)?),
    })
}

impl PacketHeader {
    /// Reads a packet header; `Ok(None)` on a clean end of input
    pub fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Self>> {
        let first = match read_byte(reader)? {
            Some(byte) => byte,
            None => return Ok(None),
        };

        // Validate PGP packet format
        if first & 0x80 == 0 {
            return Err(PgpkitError::invalid_data(format!(
                "Invalid packet header: MSB not set (0x{:02X})",
                first
            )));
        }

        if first & 0x40 != 0 {
            let length_octet = read_byte(reader)?
                .ok_or_else(|| PgpkitError::invalid_data("Incomplete packet header"))?;
            let length = read_new_length(reader, length_octet)?;
            Ok(Some(Self {
                tag: first & 0x3F,
                length,
                new_format: true,
            }))
        } else {
            let length = match first & 0x03 {
                0 => BodyLength::Fixed(read_be(reader, 1)?),
                1 => BodyLength::Fixed(read_be(reader, 2)?),
                2 => BodyLength::Fixed(read_be(reader, 4)?),
                _ => BodyLength::Indeterminate,
            };
            Ok(Some(Self {
                tag: (first >> 2) & 0x0F,
                length,
                new_format: false,
            }))
        }
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_byte(self.tag)
    }
}

/// Encodes a new-format length for a body of `len` bytes
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 192 {
        out.push(len as u8);
    } else if len < 8384 {
        let encoded = len - 192;
        out.push(192 + (encoded >> 8) as u8);
        out.push((encoded & 0xFF) as u8);
    } else {
        out.push(0xFF);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// Serializes a complete new-format packet
pub fn encode_packet(packet_type: PacketType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 6);
    out.push(0xC0 | packet_type.to_byte());
    encode_length(body.len(), &mut out);
    out.extend_from_slice(body);
    out
}

/// Current time as an OpenPGP timestamp
pub fn timestamp_now() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

pub fn write_packet<W: Write + ?Sized>(out: &mut W, packet_type: PacketType, body: &[u8]) -> io::Result<()> {
    out.write_all(&encode_packet(packet_type, body))
}

/// Reader over one packet body, following partial-length chunks
pub struct BodyReader<R> {
    inner: R,
    remaining: u64,
    partial: bool,
    indeterminate: bool,
}

impl<R: Read> BodyReader<R> {
    pub fn new(inner: R, length: BodyLength) -> Self {
        let (remaining, partial, indeterminate) = match length {
            BodyLength::Fixed(len) => (len as u64, false, false),
            BodyLength::Partial(len) => (len as u64, true, false),
            BodyLength::Indeterminate => (0, false, true),
        };
        Self {
            inner,
            remaining,
            partial,
            indeterminate,
        }
    }

    /// Reads the whole body into memory, enforcing the buffered packet limit
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&chunk[..n]);
            Validator::validate_packet_size(body.len())?;
        }
    }

    /// Skips whatever is left of the body
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for BodyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.indeterminate {
            return self.inner.read(buf);
        }
        while self.remaining == 0 {
            if !self.partial {
                return Ok(0);
            }
            let octet = read_byte(&mut self.inner)?.ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "missing partial body length")
            })?;
            match read_new_length(&mut self.inner, octet)? {
                BodyLength::Partial(len) => self.remaining = len as u64,
                BodyLength::Fixed(len) => {
                    self.remaining = len as u64;
                    self.partial = false;
                }
                BodyLength::Indeterminate => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "indeterminate length inside partial body",
                    ))
                }
            }
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated packet body",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// A packet read fully into memory
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub tag: u8,
    pub body: Vec<u8>,
}

impl RawPacket {
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_byte(self.tag)
    }
}

/// Reads the next packet fully into memory; `Ok(None)` at end of input
pub fn read_packet<R: Read + ?Sized>(reader: &mut R) -> Result<Option<RawPacket>> {
    let header = match PacketHeader::read(reader)? {
        Some(header) => header,
        None => return Ok(None),
    };
    if let BodyLength::Fixed(len) = header.length {
        Validator::validate_packet_size(len as usize)?;
    }
    let mut body_reader = BodyReader::new(reader, header.length);
    let body = body_reader.read_to_vec()?;
    Ok(Some(RawPacket {
        tag: header.tag,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_format_lengths() {
        for len in [0usize, 191, 192, 8383, 8384, 100_000] {
            let body = vec![0xAB; len];
            let encoded = encode_packet(PacketType::LiteralData, &body);
            let mut input: &[u8] = &encoded;
            let packet = read_packet(&mut input).unwrap().unwrap();
            assert_eq!(packet.packet_type(), Some(PacketType::LiteralData));
            assert_eq!(packet.body.len(), len);
            assert!(input.is_empty());
        }
    }

    #[test]
    fn test_old_format_header() {
        // Old-format user ID packet (tag 13), one-octet length
        let data = [0x80 | (13 << 2), 3, b'a', b'b', b'c'];
        let mut input: &[u8] = &data;
        let packet = read_packet(&mut input).unwrap().unwrap();
        assert_eq!(packet.packet_type(), Some(PacketType::UserId));
        assert_eq!(packet.body, b"abc");

        // Indeterminate length runs to end of input
        let data = [0x80 | (11 << 2) | 3, 1, 2, 3, 4];
        let mut input: &[u8] = &data;
        let packet = read_packet(&mut input).unwrap().unwrap();
        assert_eq!(packet.body, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_partial_body_chunks() {
        // 512-byte partial chunk followed by a 3-byte final chunk
        let mut data = vec![0xC0 | 11, 0xE9];
        data.extend(std::iter::repeat(7u8).take(512));
        data.push(3);
        data.extend_from_slice(&[1, 2, 3]);
        let mut input: &[u8] = &data;
        let packet = read_packet(&mut input).unwrap().unwrap();
        assert_eq!(packet.body.len(), 515);
        assert_eq!(&packet.body[512..], &[1, 2, 3]);
    }

    #[test]
    fn test_truncated_and_invalid_headers() {
        let mut input: &[u8] = &[0x00, 0x01];
        assert!(read_packet(&mut input).is_err());

        let mut input: &[u8] = &[0xCB, 10, 1, 2];
        assert!(read_packet(&mut input).is_err());

        let mut input: &[u8] = &[];
        assert!(read_packet(&mut input).unwrap().is_none());
    }
}
