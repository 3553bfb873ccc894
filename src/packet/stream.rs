//! Streaming packet layers.
//!
//! Writers stack on top of each other as boxed [`FinishWrite`] layers: each
//! one frames what is written into it and passes the result to the layer
//! below. `finish` completes a layer and everything beneath it, while `close`
//! completes only the layer itself and hands back the one below, so further
//! packets can follow inside the same container.

use rand::{CryptoRng, RngCore};
use std::io::{self, Read, Write};
use subtle::ConstantTimeEq;

use super::literal::LiteralHeader;
use super::session::SessionKey;
use super::{encode_length, PacketType};
use crate::crypto::hash::Hasher;
use crate::crypto::{CfbDecryptor, CfbEncryptor, CompressionAlgorithm, HashAlgorithm};
use crate::error::{PgpkitError, Result};

/// Partial body chunk size; must be a power of two of at least 512
const PARTIAL_CHUNK: usize = 8192;

/// Length of the MDC packet that ends every SEIPD body
const MDC_PACKET_LEN: usize = 22;

const MDC_HEADER: [u8; 2] = [0xD3, 0x14];

/// Message of the `CorruptData` error raised when the session key quick check fails
pub const QUICK_CHECK_FAILED: &str = "session key quick check failed";

/// A writer that has to be explicitly completed
pub trait FinishWrite: Write {
    /// Writes any trailer and completes all layers below
    fn finish(self: Box<Self>) -> io::Result<()>;
}

pub type LayerBox<'a> = Box<dyn FinishWrite + 'a>;

/// Bottom layer over a caller-supplied output
pub struct Sink<'a>(&'a mut dyn Write);

impl<'a> Sink<'a> {
    pub fn new(output: &'a mut dyn Write) -> Self {
        Self(output)
    }

    pub fn boxed(output: &'a mut dyn Write) -> LayerBox<'a> {
        Box::new(Self(output))
    }
}

impl Write for Sink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl FinishWrite for Sink<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

/// Packet body of unknown length, written in partial-length chunks
pub struct PartialBodyWriter<'a> {
    inner: LayerBox<'a>,
    buffer: Vec<u8>,
}

impl<'a> PartialBodyWriter<'a> {
    pub fn new(mut inner: LayerBox<'a>, packet_type: PacketType) -> io::Result<Self> {
        inner.write_all(&[0xC0 | packet_type.to_byte()])?;
        Ok(Self {
            inner,
            buffer: Vec::with_capacity(PARTIAL_CHUNK * 2),
        })
    }

    fn flush_chunks(&mut self) -> io::Result<()> {
        // Keep at least one byte back so the final length is always written by close
        while self.buffer.len() > PARTIAL_CHUNK {
            self.inner
                .write_all(&[0xE0 | PARTIAL_CHUNK.trailing_zeros() as u8])?;
            self.inner.write_all(&self.buffer[..PARTIAL_CHUNK])?;
            self.buffer.drain(..PARTIAL_CHUNK);
        }
        Ok(())
    }

    /// Ends the packet and returns the layer below, still open
    pub fn close(mut self) -> io::Result<LayerBox<'a>> {
        self.flush_chunks()?;
        let mut length = Vec::with_capacity(5);
        encode_length(self.buffer.len(), &mut length);
        self.inner.write_all(&length)?;
        self.inner.write_all(&self.buffer)?;
        Ok(self.inner)
    }
}

impl Write for PartialBodyWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.flush_chunks()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for PartialBodyWriter<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.close()?.finish()
    }
}

/// Opens a literal data packet and writes its header
pub fn literal_writer<'a>(inner: LayerBox<'a>, header: &LiteralHeader) -> io::Result<PartialBodyWriter<'a>> {
    let mut writer = PartialBodyWriter::new(inner, PacketType::LiteralData)?;
    writer.write_all(&header.to_bytes())?;
    Ok(writer)
}

/// Symmetrically encrypted integrity protected data packet (version 1)
pub struct SeipdWriter<'a> {
    inner: PartialBodyWriter<'a>,
    cipher: CfbEncryptor,
    mdc: Hasher,
}

impl<'a> SeipdWriter<'a> {
    pub fn new<R: CryptoRng + RngCore>(
        rng: &mut R,
        inner: LayerBox<'a>,
        session: &SessionKey,
    ) -> Result<Self> {
        let algorithm = session.algorithm();
        let mut inner = PartialBodyWriter::new(inner, PacketType::SymEncryptedIntegrityProtectedData)?;
        inner.write_all(&[1])?;

        let block = algorithm.block_size();
        let mut prefix = vec![0u8; block + 2];
        rng.fill_bytes(&mut prefix[..block]);
        prefix[block] = prefix[block - 2];
        prefix[block + 1] = prefix[block - 1];

        let mut mdc = Hasher::new(HashAlgorithm::Sha1);
        mdc.update(&prefix);
        let mut cipher = CfbEncryptor::with_zero_iv(algorithm, session.key())?;
        cipher.encrypt(&mut prefix);
        inner.write_all(&prefix)?;
        Ok(Self { inner, cipher, mdc })
    }
}

impl Write for SeipdWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.mdc.update(buf);
        let mut data = buf.to_vec();
        self.cipher.encrypt(&mut data);
        self.inner.write_all(&data)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FinishWrite for SeipdWriter<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let Self {
            mut inner,
            mut cipher,
            mut mdc,
        } = *self;
        mdc.update(&MDC_HEADER);
        let mut trailer = MDC_HEADER.to_vec();
        trailer.extend_from_slice(&mdc.finalize());
        cipher.encrypt(&mut trailer);
        inner.write_all(&trailer)?;
        Box::new(inner).finish()
    }
}

enum Compressor<'a> {
    Stored(PartialBodyWriter<'a>),
    Zip(flate2::write::DeflateEncoder<PartialBodyWriter<'a>>),
    Zlib(flate2::write::ZlibEncoder<PartialBodyWriter<'a>>),
    Bzip2(bzip2::write::BzEncoder<PartialBodyWriter<'a>>),
}

/// Compressed data packet
pub struct CompressedWriter<'a> {
    inner: Compressor<'a>,
}

impl<'a> CompressedWriter<'a> {
    pub fn new(inner: LayerBox<'a>, algorithm: CompressionAlgorithm) -> io::Result<Self> {
        let mut body = PartialBodyWriter::new(inner, PacketType::CompressedData)?;
        body.write_all(&[algorithm.to_byte()])?;
        let inner = match algorithm {
            CompressionAlgorithm::Uncompressed => Compressor::Stored(body),
            CompressionAlgorithm::Zip => Compressor::Zip(flate2::write::DeflateEncoder::new(
                body,
                flate2::Compression::default(),
            )),
            CompressionAlgorithm::Zlib => Compressor::Zlib(flate2::write::ZlibEncoder::new(
                body,
                flate2::Compression::default(),
            )),
            CompressionAlgorithm::Bzip2 => Compressor::Bzip2(bzip2::write::BzEncoder::new(
                body,
                bzip2::Compression::default(),
            )),
        };
        Ok(Self { inner })
    }

    /// Ends the compressed packet and returns the layer below, still open
    pub fn close(self) -> io::Result<LayerBox<'a>> {
        let body = match self.inner {
            Compressor::Stored(body) => body,
            Compressor::Zip(encoder) => encoder.finish()?,
            Compressor::Zlib(encoder) => encoder.finish()?,
            Compressor::Bzip2(encoder) => encoder.finish()?,
        };
        body.close()
    }
}

impl Write for CompressedWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Compressor::Stored(w) => w.write(buf),
            Compressor::Zip(w) => w.write(buf),
            Compressor::Zlib(w) => w.write(buf),
            Compressor::Bzip2(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Compressor::Stored(w) => w.flush(),
            Compressor::Zip(w) => w.flush(),
            Compressor::Zlib(w) => w.flush(),
            Compressor::Bzip2(w) => w.flush(),
        }
    }
}

impl FinishWrite for CompressedWriter<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.close()?.finish()
    }
}

/// Decompresses the body of a compressed data packet
pub fn decompressor<'a, R: Read + 'a>(mut body: R) -> Result<Box<dyn Read + 'a>> {
    let mut alg = [0u8; 1];
    body.read_exact(&mut alg)
        .map_err(|_| PgpkitError::packet("empty compressed data packet"))?;
    let algorithm = CompressionAlgorithm::from_byte(alg[0])
        .ok_or_else(|| PgpkitError::unsupported(format!("compression algorithm {}", alg[0])))?;
    Ok(match algorithm {
        CompressionAlgorithm::Uncompressed => Box::new(body),
        CompressionAlgorithm::Zip => Box::new(flate2::read::DeflateDecoder::new(body)),
        CompressionAlgorithm::Zlib => Box::new(flate2::read::ZlibDecoder::new(body)),
        CompressionAlgorithm::Bzip2 => Box::new(bzip2::read::BzDecoder::new(body)),
    })
}

/// Reads and checks the random prefix common to both encrypted data packets.
///
/// A failed quick check almost always means the session key is wrong.
fn read_prefix<R: Read>(inner: &mut R, block: usize) -> Result<Vec<u8>> {
    let mut prefix = vec![0u8; block + 2];
    inner
        .read_exact(&mut prefix)
        .map_err(|_| PgpkitError::corrupt_data("truncated encrypted data"))?;
    Ok(prefix)
}

fn quick_check(prefix: &[u8], block: usize) -> Result<()> {
    if prefix[block - 2..block] != prefix[block..block + 2] {
        return Err(PgpkitError::corrupt_data(QUICK_CHECK_FAILED));
    }
    Ok(())
}

/// Decrypting reader over a SEIPD body that checks the trailing MDC
pub struct SeipdReader<R> {
    inner: R,
    cipher: CfbDecryptor,
    mdc: Hasher,
    /// Decrypted bytes not yet handed out; the last 22 may be the MDC packet
    pending: Vec<u8>,
    eof: bool,
}

impl<R: Read> SeipdReader<R> {
    pub fn new(mut inner: R, session: &SessionKey) -> Result<Self> {
        let mut version = [0u8; 1];
        inner
            .read_exact(&mut version)
            .map_err(|_| PgpkitError::corrupt_data("empty encrypted data packet"))?;
        if version[0] != 1 {
            return Err(PgpkitError::unsupported(format!("SEIPD version {}", version[0])));
        }
        let block = session.algorithm().block_size();
        let mut prefix = read_prefix(&mut inner, block)?;
        let mut cipher = CfbDecryptor::with_zero_iv(session.algorithm(), session.key())?;
        cipher.decrypt(&mut prefix);
        quick_check(&prefix, block)?;
        let mut mdc = Hasher::new(HashAlgorithm::Sha1);
        mdc.update(&prefix);
        Ok(Self {
            inner,
            cipher,
            mdc,
            pending: Vec::new(),
            eof: false,
        })
    }

    fn fill(&mut self, wanted: usize) -> io::Result<()> {
        let mut chunk = [0u8; 8192];
        while !self.eof && self.pending.len() < wanted + MDC_PACKET_LEN {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
                break;
            }
            let start = self.pending.len();
            self.pending.extend_from_slice(&chunk[..n]);
            self.cipher.decrypt(&mut self.pending[start..]);
        }
        Ok(())
    }

    /// Consumes the rest of the packet and checks the MDC
    pub fn finish(mut self) -> io::Result<bool> {
        io::copy(&mut self, &mut io::sink())?;
        if self.pending.len() != MDC_PACKET_LEN || self.pending[..2] != MDC_HEADER {
            return Ok(false);
        }
        self.mdc.update(&MDC_HEADER);
        let digest = self.mdc.finalize();
        Ok(digest.ct_eq(&self.pending[2..]).into())
    }
}

impl<R: Read> Read for SeipdReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.fill(buf.len())?;
        let available = self.pending.len().saturating_sub(MDC_PACKET_LEN);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.mdc.update(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Decrypting reader over a legacy symmetrically encrypted data packet
pub struct SedReader<R> {
    inner: R,
    cipher: CfbDecryptor,
}

impl<R: Read> SedReader<R> {
    pub fn new(mut inner: R, session: &SessionKey) -> Result<Self> {
        let block = session.algorithm().block_size();
        let prefix_cipher = read_prefix(&mut inner, block)?;
        let mut prefix = prefix_cipher.clone();
        CfbDecryptor::with_zero_iv(session.algorithm(), session.key())?.decrypt(&mut prefix);
        quick_check(&prefix, block)?;
        // CFB resynchronizes on the ciphertext after the two check octets
        let cipher = CfbDecryptor::new(session.algorithm(), session.key(), &prefix_cipher[2..])?;
        Ok(Self { inner, cipher })
    }
}

impl<R: Read> Read for SedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.decrypt(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SymmetricAlgorithm;
    use crate::packet::{read_packet, BodyReader, PacketHeader};
    use rand::rngs::OsRng;

    fn seipd_round_trip(data: &[u8], tamper: Option<usize>) -> (Vec<u8>, bool) {
        let session = SessionKey::generate(&mut OsRng, SymmetricAlgorithm::Aes128);
        let mut out = Vec::new();
        {
            let mut writer =
                Box::new(SeipdWriter::new(&mut OsRng, Sink::boxed(&mut out), &session).unwrap());
            writer.write_all(data).unwrap();
            writer.finish().unwrap();
        }
        if let Some(pos) = tamper {
            let len = out.len();
            out[len - pos] ^= 0x01;
        }

        let mut input: &[u8] = &out;
        let header = PacketHeader::read(&mut input).unwrap().unwrap();
        assert_eq!(header.tag, 18);
        let body = BodyReader::new(&mut input, header.length);
        let mut reader = SeipdReader::new(body, &session).unwrap();
        let mut plain = Vec::new();
        reader.read_to_end(&mut plain).unwrap();
        (plain, reader.finish().unwrap())
    }

    #[test]
    fn test_seipd_round_trip() {
        for len in [0usize, 1, 21, 22, 23, 8191, 8192, 8193, 40_000] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let (plain, intact) = seipd_round_trip(&data, None);
            assert_eq!(plain, data, "length {}", len);
            assert!(intact);
        }
    }

    #[test]
    fn test_seipd_tamper_detected() {
        let data = vec![0x42u8; 1000];
        // Flip a bit inside the MDC digest
        let (_, intact) = seipd_round_trip(&data, Some(5));
        assert!(!intact);
        // Flip a bit inside the data
        let (plain, intact) = seipd_round_trip(&data, Some(100));
        assert_ne!(plain, data);
        assert!(!intact);
    }

    #[test]
    fn test_compression_round_trip() {
        let data = b"compress me ".repeat(2000);
        for algorithm in [
            CompressionAlgorithm::Uncompressed,
            CompressionAlgorithm::Zip,
            CompressionAlgorithm::Zlib,
            CompressionAlgorithm::Bzip2,
        ] {
            let mut out = Vec::new();
            {
                let mut writer = Box::new(CompressedWriter::new(Sink::boxed(&mut out), algorithm).unwrap());
                writer.write_all(&data).unwrap();
                writer.finish().unwrap();
            }
            let mut input: &[u8] = &out;
            let packet = read_packet(&mut input).unwrap().unwrap();
            assert_eq!(packet.packet_type(), Some(PacketType::CompressedData));
            let mut plain = Vec::new();
            decompressor(&packet.body[..])
                .unwrap()
                .read_to_end(&mut plain)
                .unwrap();
            assert_eq!(plain, data, "{:?}", algorithm);
        }
    }

    #[test]
    fn test_close_leaves_container_open() {
        let mut out = Vec::new();
        {
            let literal = literal_writer(Sink::boxed(&mut out), &LiteralHeader::default()).unwrap();
            let mut below = literal.close().unwrap();
            below.write_all(&[0xCA, 0x00]).unwrap();
            below.finish().unwrap();
        }
        let mut input: &[u8] = &out;
        let first = read_packet(&mut input).unwrap().unwrap();
        assert_eq!(first.packet_type(), Some(PacketType::LiteralData));
        let second = read_packet(&mut input).unwrap().unwrap();
        assert_eq!(second.packet_type(), Some(PacketType::Marker));
        assert!(second.body.is_empty());
    }
}
