//! Signing and verification of detached, cleartext and inline signatures.
//!
//! Text-mode signatures are computed over canonical text: trailing spaces
//! and tabs are stripped from each line and line endings become CRLF.
//! Binary signatures hash the data as is.

use rand::rngs::OsRng;
use std::io::{Read, Write};
use tracing::{debug, info};

use super::progress::{Progress, Step};
use super::{
    check_signature, data_signature, packet_source, pump, unlock_signer, DataHasher,
    SignatureOutcome,
};
use crate::armor::{cleartext_header, cleartext_signed_bytes, dash_escape, parse_cleartext, ArmorType, ArmorWriter};
use crate::context::Context;
use crate::crypto::hash::Hasher;
use crate::crypto::{CompressionAlgorithm, HashAlgorithm, Passphrase};
use crate::error::{PgpkitError, Result};
use crate::packet::canonical::Canonicalizer;
use crate::packet::stream::{literal_writer, CompressedWriter, FinishWrite, LayerBox, Sink};
use crate::packet::{
    read_packet, timestamp_now, write_packet, DataFormat, LiteralHeader, OnePassSignature,
    PacketType, SignaturePacket, SignatureType,
};
use crate::store::KeyStoreExt;

/// Parameters of one signing operation
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Any key ID of the signer's ring
    pub signer: u64,
    /// Falls back to the passphrase cache when absent
    pub passphrase: Option<Passphrase>,
    pub hash_algorithm: Option<HashAlgorithm>,
    /// Produce version 3 signatures for old implementations
    pub legacy: bool,
    /// Sign canonical text instead of binary data
    pub text_mode: bool,
    pub armor: bool,
    /// Compression of inline signed messages
    pub compression: Option<CompressionAlgorithm>,
    /// Literal data filename of inline signed messages
    pub filename: String,
    /// Payload size, used only for progress reporting
    pub input_size: Option<u64>,
}

impl SignOptions {
    pub fn new(signer: u64) -> Self {
        Self {
            signer,
            ..Self::default()
        }
    }
}

/// Signatures found and checked by a verification
#[derive(Debug, Clone, Default)]
pub struct VerifyOutcome {
    pub signatures: Vec<SignatureOutcome>,
}

impl VerifyOutcome {
    /// At least one signature, and every one of them verified
    pub fn all_verified(&self) -> bool {
        !self.signatures.is_empty() && self.signatures.iter().all(|s| s.status.is_verified())
    }
}

fn sig_type(text_mode: bool) -> SignatureType {
    if text_mode {
        SignatureType::Text
    } else {
        SignatureType::Binary
    }
}

/// Writes a signature packet, armored as a signature block when requested
fn write_signature(ctx: &Context, output: &mut dyn Write, sig: &SignaturePacket, armor: bool) -> Result<()> {
    if armor {
        let mut writer = ArmorWriter::new(
            Sink::boxed(output),
            &ArmorType::Signature,
            ctx.config.armor_version(),
        )?;
        write_packet(&mut writer, PacketType::Signature, &sig.to_bytes())?;
        Box::new(writer).finish()?;
    } else {
        write_packet(output, PacketType::Signature, &sig.to_bytes())?;
    }
    Ok(())
}

/// Signs `input` and writes only the signature to `output`.
pub fn sign_detached(
    ctx: &Context,
    input: &mut dyn Read,
    output: &mut dyn Write,
    options: &SignOptions,
    progress: &Progress<'_>,
) -> Result<()> {
    let hash = options.hash_algorithm.unwrap_or(ctx.config.hash_algorithm);
    progress.report(Step::UnlockingKey, 0);
    let (ring, key) = unlock_signer(ctx, options.signer, options.passphrase.as_ref())?;
    let template = data_signature(&ring, &key, sig_type(options.text_mode), hash, options.legacy);
    let canon = options.text_mode.then(Canonicalizer::stripping);
    let mut hasher = DataHasher::new(Hasher::new(hash), canon);

    let bytes = pump(
        input,
        ctx.config.chunk_size,
        progress,
        Step::Signing,
        options.input_size,
        |chunk| {
            hasher.update(chunk);
            Ok(())
        },
    )?;
    let sig = template.sign(hasher.finish(), &key)?;
    write_signature(ctx, output, &sig, options.armor)?;

    progress.report(Step::Done, 100);
    info!(
        key_id = format!("{:016X}", key.key_id()),
        bytes,
        text = options.text_mode,
        "Created detached signature"
    );
    Ok(())
}

/// Reads all of `input` as UTF-8 text
fn read_text(ctx: &Context, input: &mut dyn Read, step: Step, progress: &Progress<'_>, total: Option<u64>) -> Result<String> {
    let mut data = Vec::new();
    pump(input, ctx.config.chunk_size, progress, step, total, |chunk| {
        data.extend_from_slice(chunk);
        Ok(())
    })?;
    String::from_utf8(data).map_err(|_| PgpkitError::invalid_input("cleartext input must be UTF-8"))
}

/// Writes `input` as a cleartext signed message.
///
/// Lines starting with a dash or "From " are dash-escaped; the signature
/// covers the lines without trailing whitespace.
pub fn sign_cleartext(
    ctx: &Context,
    input: &mut dyn Read,
    output: &mut dyn Write,
    options: &SignOptions,
    progress: &Progress<'_>,
) -> Result<()> {
    let hash = options.hash_algorithm.unwrap_or(ctx.config.hash_algorithm);
    progress.report(Step::UnlockingKey, 0);
    let (ring, key) = unlock_signer(ctx, options.signer, options.passphrase.as_ref())?;
    let text = read_text(ctx, input, Step::Signing, progress, options.input_size)?;
    let lines: Vec<&str> = text.lines().collect();

    let template = data_signature(&ring, &key, SignatureType::Text, hash, options.legacy);
    let mut hasher = Hasher::new(hash);
    hasher.update(&cleartext_signed_bytes(&lines));
    let sig = template.sign(hasher, &key)?;

    output.write_all(cleartext_header(hash).as_bytes())?;
    for line in &lines {
        output.write_all(dash_escape(line).as_bytes())?;
        output.write_all(b"\n")?;
    }
    write_signature(ctx, output, &sig, true)?;

    progress.report(Step::Done, 100);
    info!(
        key_id = format!("{:016X}", key.key_id()),
        lines = lines.len(),
        "Created cleartext signature"
    );
    Ok(())
}

/// Writes a signed message carrying `input` as literal data.
///
/// The result is read back with [`decrypt`](super::decrypt), which accepts
/// unencrypted messages and checks their signatures.
pub fn sign_inline(
    ctx: &Context,
    input: &mut dyn Read,
    output: &mut dyn Write,
    options: &SignOptions,
    progress: &Progress<'_>,
) -> Result<()> {
    let config = &ctx.config;
    let hash = options.hash_algorithm.unwrap_or(config.hash_algorithm);
    let compression = options.compression.unwrap_or(config.compression_algorithm);
    progress.report(Step::UnlockingKey, 0);
    let (ring, key) = unlock_signer(ctx, options.signer, options.passphrase.as_ref())?;
    let sig_type = sig_type(options.text_mode);
    let template = data_signature(&ring, &key, sig_type, hash, options.legacy);

    let mut out: LayerBox<'_> = Sink::boxed(output);
    if options.armor {
        out = Box::new(ArmorWriter::new(out, &ArmorType::Message, config.armor_version())?);
    }
    let mut container: LayerBox<'_> = if compression == CompressionAlgorithm::Uncompressed {
        out
    } else {
        Box::new(CompressedWriter::new(out, compression)?)
    };

    let one_pass = OnePassSignature::for_signature(&template, key.key_id());
    write_packet(&mut container, PacketType::OnePassSignature, &one_pass.to_bytes())?;
    let format = if options.text_mode {
        DataFormat::Text
    } else {
        DataFormat::Binary
    };
    let header = LiteralHeader::new(format, options.filename.clone(), timestamp_now());
    let mut literal = literal_writer(container, &header)?;
    let mut hasher = DataHasher::for_type(sig_type, hash);
    let bytes = pump(
        input,
        config.chunk_size,
        progress,
        Step::Signing,
        options.input_size,
        |chunk| {
            literal.write_all(chunk)?;
            hasher.update(chunk);
            Ok(())
        },
    )?;
    let mut container = literal.close()?;
    let sig = template.sign(hasher.finish(), &key)?;
    write_packet(&mut container, PacketType::Signature, &sig.to_bytes())?;
    container.finish()?;

    progress.report(Step::Done, 100);
    info!(
        key_id = format!("{:016X}", key.key_id()),
        bytes,
        "Created inline signed message"
    );
    Ok(())
}

/// Signature packets of an armored or binary signature input
fn read_signatures(input: &mut dyn Read) -> Result<Vec<SignaturePacket>> {
    let mut source = packet_source(input)?;
    let mut signatures = Vec::new();
    while let Some(packet) = read_packet(&mut source)? {
        match packet.packet_type() {
            Some(PacketType::Signature) => signatures.push(SignaturePacket::parse(&packet.body)?),
            _ => debug!(tag = packet.tag, "Skipping non-signature packet"),
        }
    }
    if signatures.is_empty() {
        return Err(PgpkitError::invalid_data("no signature found"));
    }
    Ok(signatures)
}

/// Hashers for one detached signature; text signatures get a second,
/// non-stripping canonicalization to accept signers that keep whitespace
struct DetachedCheck {
    signature: SignaturePacket,
    hashers: Vec<DataHasher>,
}

/// Checks detached `signature` against `data`.
pub fn verify_detached(
    ctx: &Context,
    data: &mut dyn Read,
    signature: &mut dyn Read,
    progress: &Progress<'_>,
) -> Result<VerifyOutcome> {
    ctx.store.ensure_ready()?;
    let mut checks: Vec<DetachedCheck> = read_signatures(signature)?
        .into_iter()
        .map(|signature| {
            let hashers = if signature.sig_type() == SignatureType::Text {
                vec![
                    DataHasher::new(signature.hasher(), Some(Canonicalizer::stripping())),
                    DataHasher::new(signature.hasher(), Some(Canonicalizer::crlf())),
                ]
            } else {
                vec![DataHasher::new(signature.hasher(), None)]
            };
            DetachedCheck { signature, hashers }
        })
        .collect();

    pump(data, ctx.config.chunk_size, progress, Step::Verifying, None, |chunk| {
        for hasher in checks.iter_mut().flat_map(|c| c.hashers.iter_mut()) {
            hasher.update(chunk);
        }
        Ok(())
    })?;

    let mut outcome = VerifyOutcome::default();
    for check in checks {
        let key_id = check.signature.issuer().unwrap_or(0);
        let mut result = None;
        for hasher in check.hashers {
            let attempt = check_signature(ctx, &check.signature, key_id, hasher.finish())?;
            let verified = attempt.status.is_verified();
            result = Some(attempt);
            if verified {
                break;
            }
        }
        outcome.signatures.extend(result);
    }
    progress.report(Step::Done, 100);
    info!(signatures = outcome.signatures.len(), verified = outcome.all_verified(), "Verified detached signature");
    Ok(outcome)
}

/// Checks a cleartext signed message, writing the recovered text to `output`.
pub fn verify_cleartext(
    ctx: &Context,
    input: &mut dyn Read,
    output: &mut dyn Write,
    progress: &Progress<'_>,
) -> Result<VerifyOutcome> {
    ctx.store.ensure_ready()?;
    let text = read_text(ctx, input, Step::Verifying, progress, None)?;
    let cleartext = parse_cleartext(&text)?;
    let signed = cleartext.signed_text();
    let signatures = read_signatures(&mut &cleartext.signature.data[..])?;

    let mut outcome = VerifyOutcome::default();
    for signature in &signatures {
        let key_id = signature.issuer().unwrap_or(0);
        let mut hasher = signature.hasher();
        hasher.update(&signed);
        outcome
            .signatures
            .push(check_signature(ctx, signature, key_id, hasher)?);
    }
    output.write_all(cleartext.text().as_bytes())?;

    progress.report(Step::Done, 100);
    info!(signatures = outcome.signatures.len(), verified = outcome.all_verified(), "Verified cleartext signature");
    Ok(outcome)
}
