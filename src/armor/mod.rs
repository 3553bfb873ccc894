//! ASCII armor encoding and decoding for PGP messages and keys.
//!
//! This module implements the ASCII armor format defined in RFC 4880 §6,
//! both as buffered helpers and as streaming reader/writer layers, plus the
//! cleartext signature framework (§7).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::borrow::Cow;
use std::io::{self, BufRead, Read, Write};

use crate::crypto::HashAlgorithm;
use crate::error::{PgpkitError, Result};
use crate::packet::canonical::trim_line_end;
use crate::packet::stream::{FinishWrite, LayerBox};

/// CRC-24 polynomial used for PGP armor checksums
const CRC24_POLY: u32 = 0x1864CFB;
const CRC24_INIT: u32 = 0xB704CE;

/// Binary bytes per armored line (64 base64 characters)
const LINE_BYTES: usize = 48;

/// First line of a cleartext signed message
pub const SIGNED_MESSAGE_BEGIN: &str = "-----BEGIN PGP SIGNED MESSAGE-----";

/// ASCII armor message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmorType {
    /// PGP message (encrypted or signed data)
    Message,
    /// Signed message with cleartext
    SignedMessage,
    /// Public key block
    PublicKey,
    /// Private key block
    PrivateKey,
    /// Signature block
    Signature,
    /// Any other armor label
    Custom(String),
}

impl ArmorType {
    /// Get the armor header string for this type
    pub fn header_string(&self) -> String {
        match self {
            ArmorType::Message => "PGP MESSAGE".to_string(),
            ArmorType::SignedMessage => "PGP SIGNED MESSAGE".to_string(),
            ArmorType::PublicKey => "PGP PUBLIC KEY BLOCK".to_string(),
            ArmorType::PrivateKey => "PGP PRIVATE KEY BLOCK".to_string(),
            ArmorType::Signature => "PGP SIGNATURE".to_string(),
            ArmorType::Custom(s) => s.clone(),
        }
    }

    /// Parse armor type from header string
    pub fn from_header_string(header: &str) -> Self {
        match header {
            "PGP MESSAGE" => ArmorType::Message,
            "PGP SIGNED MESSAGE" => ArmorType::SignedMessage,
            "PGP PUBLIC KEY BLOCK" => ArmorType::PublicKey,
            "PGP PRIVATE KEY BLOCK" => ArmorType::PrivateKey,
            "PGP SIGNATURE" => ArmorType::Signature,
            s => ArmorType::Custom(s.to_string()),
        }
    }
}

/// ASCII armored data with headers and checksums
#[derive(Debug, Clone)]
pub struct ArmoredData {
    /// The type of armored data
    pub armor_type: ArmorType,
    /// Armor headers in the order they appeared
    pub headers: Vec<(String, String)>,
    /// The decoded binary data
    pub data: Vec<u8>,
}

impl ArmoredData {
    /// Get the first value of a header
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Incremental CRC-24
#[derive(Debug, Clone, Copy)]
pub struct Crc24(u32);

impl Default for Crc24 {
    fn default() -> Self {
        Self(CRC24_INIT)
    }
}

impl Crc24 {
    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.0;
        for &byte in data {
            crc ^= (byte as u32) << 16;
            for _ in 0..8 {
                crc <<= 1;
                if crc & 0x1000000 != 0 {
                    crc ^= CRC24_POLY;
                }
            }
        }
        self.0 = crc & 0xFFFFFF;
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    fn encoded(&self) -> String {
        let bytes = self.0.to_be_bytes();
        STANDARD.encode(&bytes[1..])
    }
}

/// Calculate CRC-24 checksum used in PGP armor
pub fn crc24(data: &[u8]) -> u32 {
    let mut crc = Crc24::default();
    crc.update(data);
    crc.value()
}

/// Streaming armor encoder
pub struct ArmorWriter<'a> {
    inner: LayerBox<'a>,
    label: String,
    crc: Crc24,
    line: Vec<u8>,
}

impl<'a> ArmorWriter<'a> {
    pub fn new(mut inner: LayerBox<'a>, armor_type: &ArmorType, version: Option<&str>) -> io::Result<Self> {
        let label = armor_type.header_string();
        writeln!(inner, "-----BEGIN {}-----", label)?;
        if let Some(version) = version {
            writeln!(inner, "Version: {}", version)?;
        }
        writeln!(inner)?;
        Ok(Self {
            inner,
            label,
            crc: Crc24::default(),
            line: Vec::with_capacity(LINE_BYTES),
        })
    }
}

impl Write for ArmorWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.crc.update(buf);
        let mut rest = buf;
        while !rest.is_empty() {
            let take = (LINE_BYTES - self.line.len()).min(rest.len());
            self.line.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.line.len() == LINE_BYTES {
                writeln!(self.inner, "{}", STANDARD.encode(&self.line))?;
                self.line.clear();
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for ArmorWriter<'_> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        if !self.line.is_empty() {
            let encoded = STANDARD.encode(&self.line);
            writeln!(self.inner, "{}", encoded)?;
        }
        let checksum = self.crc.encoded();
        writeln!(self.inner, "={}", checksum)?;
        writeln!(self.inner, "-----END {}-----", self.label)?;
        self.inner.finish()
    }
}

/// Encode binary data as ASCII armored text
pub fn encode(data: &[u8], armor_type: ArmorType) -> Result<String> {
    encode_with_headers(data, armor_type, &[])
}

/// Encode binary data as ASCII armored text with custom headers
pub fn encode_with_headers(
    data: &[u8],
    armor_type: ArmorType,
    headers: &[(String, String)],
) -> Result<String> {
    let mut output = String::new();
    let header_string = armor_type.header_string();
    output.push_str(&format!("-----BEGIN {}-----\n", header_string));
    for (key, value) in headers {
        output.push_str(&format!("{}: {}\n", key, value));
    }
    output.push('\n');

    for chunk in data.chunks(LINE_BYTES) {
        output.push_str(&STANDARD.encode(chunk));
        output.push('\n');
    }

    let mut crc = Crc24::default();
    crc.update(data);
    output.push('=');
    output.push_str(&crc.encoded());
    output.push('\n');
    output.push_str(&format!("-----END {}-----\n", header_string));
    Ok(output)
}

fn armor_err(msg: impl ToString) -> io::Error {
    PgpkitError::armor(msg).into_io()
}

/// Reads one line without its line ending; `None` at end of input
fn read_line<R: BufRead>(reader: &mut R, line: &mut String) -> io::Result<bool> {
    line.clear();
    let mut raw = Vec::new();
    if reader.read_until(b'\n', &mut raw)? == 0 {
        return Ok(false);
    }
    while matches!(raw.last(), Some(b'\n' | b'\r')) {
        raw.pop();
    }
    line.push_str(&String::from_utf8_lossy(&raw));
    Ok(true)
}

/// Check if a line contains valid base64 characters
fn is_base64_line(line: &str) -> bool {
    !line.is_empty()
        && line
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
}

/// Streaming armor decoder for one armored block
pub struct ArmorReader<R> {
    inner: R,
    armor_type: ArmorType,
    headers: Vec<(String, String)>,
    /// Base64 characters not yet forming a full quantum
    carry: String,
    decoded: Vec<u8>,
    pos: usize,
    crc: Crc24,
    done: bool,
}

impl<R: BufRead> ArmorReader<R> {
    /// Positions on the next armor block; `Ok(None)` when there is none
    pub fn open(mut inner: R) -> Result<Option<Self>> {
        let mut line = String::new();
        let armor_type = loop {
            if !read_line(&mut inner, &mut line)? {
                return Ok(None);
            }
            let trimmed = line.trim();
            if let Some(label) = trimmed
                .strip_prefix("-----BEGIN ")
                .and_then(|rest| rest.strip_suffix("-----"))
            {
                break ArmorType::from_header_string(label);
            }
        };

        let mut reader = Self {
            inner,
            armor_type,
            headers: Vec::new(),
            carry: String::new(),
            decoded: Vec::new(),
            pos: 0,
            crc: Crc24::default(),
            done: false,
        };
        loop {
            if !read_line(&mut reader.inner, &mut line)? {
                return Err(PgpkitError::armor("Unexpected end of input while reading headers"));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            match trimmed.split_once(": ") {
                Some((key, value)) => reader
                    .headers
                    .push((key.trim().to_string(), value.trim().to_string())),
                None if is_base64_line(trimmed) => {
                    // Missing blank line: this is already data
                    let owned = trimmed.to_string();
                    reader.take_data_line(&owned).map_err(PgpkitError::from)?;
                    break;
                }
                None => return Err(PgpkitError::armor(format!("Invalid armor header: {}", trimmed))),
            }
        }
        Ok(Some(reader))
    }

    /// Like [`ArmorReader::open`], but missing armor is an error
    pub fn new(inner: R) -> Result<Self> {
        Self::open(inner)?.ok_or_else(|| PgpkitError::armor("No armor header found"))
    }

    pub fn armor_type(&self) -> &ArmorType {
        &self.armor_type
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn decode_carry(&mut self, all: bool) -> io::Result<()> {
        let usable = if all {
            self.carry.len()
        } else {
            self.carry.len() / 4 * 4
        };
        if usable == 0 {
            return Ok(());
        }
        let bytes = STANDARD
            .decode(&self.carry[..usable])
            .map_err(|e| armor_err(format!("Invalid base64 data: {}", e)))?;
        self.carry.drain(..usable);
        self.crc.update(&bytes);
        self.decoded.extend_from_slice(&bytes);
        Ok(())
    }

    fn take_data_line(&mut self, line: &str) -> io::Result<()> {
        if !is_base64_line(line) {
            return Err(armor_err(format!("Invalid base64 data: {}", line)));
        }
        self.carry.push_str(line);
        self.decode_carry(line.ends_with('='))
    }

    fn finish_block(&mut self, checksum: Option<&str>) -> io::Result<()> {
        self.decode_carry(true)?;
        if let Some(checksum) = checksum {
            let expected = STANDARD
                .decode(checksum)
                .map_err(|_| armor_err("Invalid checksum encoding"))?;
            if expected.len() != 3 {
                return Err(armor_err("Invalid checksum length"));
            }
            let expected = u32::from_be_bytes([0, expected[0], expected[1], expected[2]]);
            if expected != self.crc.value() {
                return Err(armor_err(format!(
                    "Checksum mismatch: expected {:06X}, got {:06X}",
                    expected,
                    self.crc.value()
                )));
            }
        }
        self.done = true;
        Ok(())
    }

    /// Decodes at least one more line, or completes the block
    fn next_line(&mut self) -> io::Result<()> {
        let mut line = String::new();
        if !read_line(&mut self.inner, &mut line)? {
            return Err(armor_err("Unexpected end of input while reading data"));
        }
        let trimmed = line.trim();
        if trimmed.starts_with("-----END ") {
            return self.finish_block(None);
        }
        if let Some(checksum) = trimmed.strip_prefix('=') {
            if checksum.len() == 4 {
                let checksum = checksum.to_string();
                self.finish_block(Some(&checksum))?;
                if !read_line(&mut self.inner, &mut line)? || !line.trim().starts_with("-----END ") {
                    return Err(armor_err("Missing end header"));
                }
                return Ok(());
            }
        }
        if trimmed.is_empty() {
            return Ok(());
        }
        let owned = trimmed.to_string();
        self.take_data_line(&owned)
    }
}

impl<R: BufRead> Read for ArmorReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.decoded.len() {
            if self.done {
                return Ok(0);
            }
            self.decoded.clear();
            self.pos = 0;
            self.next_line()?;
        }
        let n = buf.len().min(self.decoded.len() - self.pos);
        buf[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Decode ASCII armored text to binary data
pub fn decode(armored_text: &str) -> Result<ArmoredData> {
    let mut reader = ArmorReader::new(armored_text.as_bytes())?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(ArmoredData {
        armor_type: reader.armor_type.clone(),
        headers: reader.headers.clone(),
        data,
    })
}

/// Escapes a cleartext line starting with a dash or "From "
pub fn dash_escape(line: &str) -> Cow<'_, str> {
    if line.starts_with('-') || line.starts_with("From ") {
        Cow::Owned(format!("- {}", line))
    } else {
        Cow::Borrowed(line)
    }
}

/// Header block of a cleartext signed message
pub fn cleartext_header(hash: HashAlgorithm) -> String {
    format!("{}\nHash: {}\n\n", SIGNED_MESSAGE_BEGIN, hash.armor_name())
}

/// Canonical form of cleartext lines: trailing whitespace stripped, joined
/// with CRLF, no line ending after the last line
pub fn cleartext_signed_bytes<S: AsRef<str>>(lines: &[S]) -> Vec<u8> {
    let lines: Vec<&str> = lines.iter().map(|l| trim_line_end(l.as_ref())).collect();
    lines.join("\r\n").into_bytes()
}

/// A parsed cleartext signed message
#[derive(Debug, Clone)]
pub struct Cleartext {
    /// Hash algorithms declared in `Hash:` headers
    pub hashes: Vec<String>,
    /// Message lines, dash-escaping removed
    pub lines: Vec<String>,
    /// The trailing signature block
    pub signature: ArmoredData,
}

impl Cleartext {
    /// Canonical text the signature is computed over
    pub fn signed_text(&self) -> Vec<u8> {
        cleartext_signed_bytes(&self.lines)
    }

    /// The message text as displayed to users
    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

/// Parses a cleartext signed message
pub fn parse_cleartext(input: &str) -> Result<Cleartext> {
    let mut lines = input.lines();
    lines
        .by_ref()
        .find(|line| line.trim_end() == SIGNED_MESSAGE_BEGIN)
        .ok_or_else(|| PgpkitError::armor("Not a valid PGP signed message"))?;

    let mut hashes = Vec::new();
    for line in lines.by_ref() {
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        match line.split_once(": ") {
            Some(("Hash", value)) => {
                hashes.extend(value.split(',').map(|h| h.trim().to_string()));
            }
            Some(_) => {}
            None => return Err(PgpkitError::armor(format!("Invalid armor header: {}", line))),
        }
    }

    let mut body = Vec::new();
    let mut found_signature = false;
    for line in lines.by_ref() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim_end() == "-----BEGIN PGP SIGNATURE-----" {
            found_signature = true;
            break;
        }
        body.push(line.strip_prefix("- ").unwrap_or(line).to_string());
    }
    if !found_signature {
        return Err(PgpkitError::armor("Invalid signed message format"));
    }

    let mut signature_text = String::from("-----BEGIN PGP SIGNATURE-----\n");
    for line in lines {
        signature_text.push_str(line);
        signature_text.push('\n');
    }
    let signature = decode(&signature_text)?;
    if signature.armor_type != ArmorType::Signature {
        return Err(PgpkitError::armor("Signed message does not end in a signature block"));
    }

    Ok(Cleartext {
        hashes,
        lines: body,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::stream::Sink;

    #[test]
    fn test_crc24_calculation() {
        assert_eq!(crc24(b""), CRC24_INIT);
        // Known value for the ASCII digits "123456789"
        assert_eq!(crc24(b"123456789"), 0x21CF02);
    }

    #[test]
    fn test_armor_type_parsing() {
        assert_eq!(ArmorType::from_header_string("PGP MESSAGE"), ArmorType::Message);
        assert_eq!(
            ArmorType::from_header_string("PGP PUBLIC KEY BLOCK"),
            ArmorType::PublicKey
        );
        assert_eq!(
            ArmorType::from_header_string("PGP ARMORED FILE"),
            ArmorType::Custom("PGP ARMORED FILE".to_string())
        );
    }

    #[test]
    fn test_armor_roundtrip() {
        let original_data = b"This is a test message for PGP armor encoding and decoding.";
        let headers = vec![("Version".to_string(), "pgpkit 0.1.0".to_string())];
        let armored = encode_with_headers(original_data, ArmorType::Message, &headers).unwrap();
        assert!(armored.starts_with("-----BEGIN PGP MESSAGE-----\nVersion: pgpkit 0.1.0\n\n"));

        let decoded = decode(&armored).unwrap();
        assert_eq!(decoded.armor_type, ArmorType::Message);
        assert_eq!(decoded.data, original_data);
        assert_eq!(decoded.get_header("Version"), Some("pgpkit 0.1.0"));
    }

    #[test]
    fn test_streaming_writer_matches_buffered() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut out = Vec::new();
        {
            let mut writer = Box::new(
                ArmorWriter::new(Sink::boxed(&mut out), &ArmorType::PublicKey, None).unwrap(),
            );
            for chunk in data.chunks(37) {
                writer.write_all(chunk).unwrap();
            }
            writer.finish().unwrap();
        }
        let buffered = encode(&data, ArmorType::PublicKey).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), buffered);
        assert!(buffered.lines().all(|line| line.len() <= 64));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut armored = encode(b"Hello World", ArmorType::Message).unwrap();
        let pos = armored.find("\n=").unwrap() + 2;
        let replacement = if &armored[pos..pos + 1] == "A" { "B" } else { "A" };
        armored.replace_range(pos..pos + 1, replacement);
        assert!(matches!(decode(&armored), Err(PgpkitError::Armor(_))));
    }

    #[test]
    fn test_armor_without_checksum() {
        let armor_without_checksum = "-----BEGIN PGP MESSAGE-----\n\nSGVsbG8gV29ybGQ=\n-----END PGP MESSAGE-----\n";
        let decoded = decode(armor_without_checksum).unwrap();
        assert_eq!(decoded.data, b"Hello World");
    }

    #[test]
    fn test_invalid_armor_decode() {
        assert!(decode("This is not valid armor data").is_err());
        assert!(decode("-----BEGIN PGP MESSAGE-----\n\nSGVs*G8=\n-----END PGP MESSAGE-----\n").is_err());
        assert!(decode("-----BEGIN PGP MESSAGE-----\n\nSGVsbG8=\n").is_err());
    }

    #[test]
    fn test_multiple_blocks() {
        let mut text = encode(b"first", ArmorType::PublicKey).unwrap();
        text.push_str("garbage between blocks\n");
        text.push_str(&encode(b"second", ArmorType::PublicKey).unwrap());

        let mut input = text.as_bytes();
        let mut blocks = Vec::new();
        while let Some(mut reader) = ArmorReader::open(&mut input).unwrap() {
            let mut data = Vec::new();
            reader.read_to_end(&mut data).unwrap();
            blocks.push(data);
        }
        assert_eq!(blocks, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_dash_escape() {
        assert_eq!(dash_escape("-----BEGIN"), "- -----BEGIN");
        assert_eq!(dash_escape("From me"), "- From me");
        assert_eq!(dash_escape("plain"), "plain");
    }

    #[test]
    fn test_parse_cleartext() {
        let mut text = cleartext_header(HashAlgorithm::Sha256);
        text.push_str("- -dashed line\nsecond line  \n");
        text.push_str(&encode(b"sig", ArmorType::Signature).unwrap());

        let parsed = parse_cleartext(&text).unwrap();
        assert_eq!(parsed.hashes, vec!["SHA256".to_string()]);
        assert_eq!(parsed.lines, vec!["-dashed line", "second line  "]);
        assert_eq!(parsed.signed_text(), b"-dashed line\r\nsecond line");
        assert_eq!(parsed.signature.data, b"sig");
    }

    #[test]
    fn test_parse_invalid_signed_message() {
        assert!(parse_cleartext("This is not a signed message").is_err());
        let incomplete = "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA1\n\nMessage without signature";
        assert!(parse_cleartext(incomplete).is_err());
    }
}
