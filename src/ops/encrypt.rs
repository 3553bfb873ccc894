//! Encryption pipeline.
//!
//! Wire layout of a produced message, outermost first:
//!
//! ```text
//! PKESK* SKESK? SEIPD(
//!     Compressed?(
//!         OnePassSignature? Literal Signature?
//!     ) MDC
//! )
//! ```

use rand::rngs::OsRng;
use std::io::{Read, Write};
use tracing::{debug, info, warn};

use super::progress::{Progress, Step};
use super::{data_signature, pump, unlock_signer, DataHasher};
use crate::armor::{ArmorType, ArmorWriter};
use crate::cache::SYMMETRIC_KEY_ID;
use crate::context::Context;
use crate::crypto::{
    CompressionAlgorithm, HashAlgorithm, Passphrase, SymmetricAlgorithm,
};
use crate::error::{PgpkitError, Result};
use crate::packet::stream::{literal_writer, CompressedWriter, LayerBox, SeipdWriter, Sink};
use crate::packet::{
    timestamp_now, write_packet, DataFormat, LiteralHeader, OnePassSignature, PacketType,
    PublicKeyEncryptedSessionKey, PublicKeyPacket, SessionKey, SignatureType,
    SymmetricKeyEncryptedSessionKey,
};
use crate::store::KeyStoreExt;

/// Parameters of one encryption
#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    pub armor: bool,
    /// Key IDs of recipients; unresolvable ones are skipped
    pub recipients: Vec<u64>,
    pub symmetric_passphrase: Option<Passphrase>,
    /// Any key ID of the signer's ring
    pub signer: Option<u64>,
    /// Falls back to the passphrase cache when absent
    pub signer_passphrase: Option<Passphrase>,
    pub symmetric_algorithm: Option<SymmetricAlgorithm>,
    pub hash_algorithm: Option<HashAlgorithm>,
    pub compression: Option<CompressionAlgorithm>,
    /// Marks the literal data as text and signs it in text mode
    pub text_mode: bool,
    pub filename: String,
    /// Payload size, used only for progress reporting
    pub input_size: Option<u64>,
}

/// Encryption key packet of each recipient ring that can be found
fn resolve_recipients(ctx: &Context, recipients: &[u64]) -> Result<Vec<PublicKeyPacket>> {
    let mut keys = Vec::with_capacity(recipients.len());
    for &id in recipients {
        let Some(ring) = ctx.store.public_ring(id)? else {
            warn!(key_id = format!("{:016X}", id), "Skipping unknown recipient");
            continue;
        };
        let Some(key_id) = ring.encryption_key_id() else {
            warn!(key_id = format!("{:016X}", id), "Skipping recipient without usable encryption key");
            continue;
        };
        if let Some(key) = ring.key_packet(key_id) {
            debug!(
                recipient = format!("{:016X}", id),
                key_id = format!("{:016X}", key_id),
                "Resolved recipient key"
            );
            keys.push(key.clone());
        }
    }
    Ok(keys)
}

/// Encrypts `input` to the requested recipients and/or passphrase.
///
/// All preconditions are checked before the first byte is written.
pub fn encrypt(
    ctx: &Context,
    input: &mut dyn Read,
    output: &mut dyn Write,
    options: &EncryptOptions,
    progress: &Progress<'_>,
) -> Result<()> {
    ctx.store.ensure_ready()?;
    if options.recipients.is_empty() && options.symmetric_passphrase.is_none() {
        return Err(PgpkitError::NoEncryptionKeysOrPassphrase);
    }
    let config = &ctx.config;
    let cipher = options.symmetric_algorithm.unwrap_or(config.symmetric_algorithm);
    let hash = options.hash_algorithm.unwrap_or(config.hash_algorithm);
    let compression = options.compression.unwrap_or(config.compression_algorithm);

    progress.report(Step::PreparingKeys, 0);
    let recipients = resolve_recipients(ctx, &options.recipients)?;
    if recipients.is_empty() && options.symmetric_passphrase.is_none() {
        return Err(PgpkitError::NoEncryptionKeysOrPassphrase);
    }

    let signer = match options.signer {
        Some(id) => {
            progress.report(Step::UnlockingKey, 0);
            Some(unlock_signer(ctx, id, options.signer_passphrase.as_ref())?)
        }
        None => None,
    };

    let mut rng = OsRng;
    let mut session_packets = Vec::with_capacity(recipients.len() + 1);
    let session = match (&options.symmetric_passphrase, recipients.is_empty()) {
        (Some(passphrase), true) => {
            let (skesk, session) = SymmetricKeyEncryptedSessionKey::derive(
                &mut rng,
                passphrase,
                cipher,
                hash,
                config.protection.count,
            )?;
            session_packets.push((PacketType::SymmetricKeyEncryptedSessionKey, skesk.to_bytes()));
            session
        }
        (symmetric, _) => {
            let session = SessionKey::generate(&mut rng, cipher);
            for key in &recipients {
                let pkesk = PublicKeyEncryptedSessionKey::encrypt(&mut rng, key, &session)?;
                session_packets.push((PacketType::PublicKeyEncryptedSessionKey, pkesk.to_bytes()));
            }
            if let Some(passphrase) = symmetric {
                let skesk = SymmetricKeyEncryptedSessionKey::wrap(
                    &mut rng,
                    passphrase,
                    &session,
                    hash,
                    config.protection.count,
                )?;
                session_packets.push((PacketType::SymmetricKeyEncryptedSessionKey, skesk.to_bytes()));
            }
            session
        }
    };
    if let Some(passphrase) = &options.symmetric_passphrase {
        ctx.cache.set(SYMMETRIC_KEY_ID, passphrase.clone());
    }

    let mut out: LayerBox<'_> = Sink::boxed(output);
    if options.armor {
        out = Box::new(ArmorWriter::new(out, &ArmorType::Message, config.armor_version())?);
    }
    for (packet_type, body) in &session_packets {
        write_packet(&mut out, *packet_type, body)?;
    }
    let seipd: LayerBox<'_> = Box::new(SeipdWriter::new(&mut rng, out, &session)?);
    let mut container: LayerBox<'_> = if compression == CompressionAlgorithm::Uncompressed {
        seipd
    } else {
        Box::new(CompressedWriter::new(seipd, compression)?)
    };

    let sig_type = if options.text_mode {
        SignatureType::Text
    } else {
        SignatureType::Binary
    };
    let signing = match &signer {
        Some((ring, key)) => {
            let template = data_signature(ring, key, sig_type, hash, false);
            let one_pass = OnePassSignature::for_signature(&template, key.key_id());
            write_packet(&mut container, PacketType::OnePassSignature, &one_pass.to_bytes())?;
            let hasher = DataHasher::for_type(sig_type, hash);
            Some((template, hasher, key))
        }
        None => None,
    };

    let format = if options.text_mode {
        DataFormat::Text
    } else {
        DataFormat::Binary
    };
    let header = LiteralHeader::new(format, options.filename.clone(), timestamp_now());
    let mut literal = literal_writer(container, &header)?;
    let (template, mut data_hasher) = match signing {
        Some((template, hasher, key)) => (Some((template, key)), Some(hasher)),
        None => (None, None),
    };
    let written = pump(
        input,
        config.chunk_size,
        progress,
        Step::Encrypting,
        options.input_size,
        |chunk| {
            literal.write_all(chunk)?;
            if let Some(hasher) = &mut data_hasher {
                hasher.update(chunk);
            }
            Ok(())
        },
    )?;
    let mut container = literal.close()?;

    if let (Some((template, key)), Some(data_hasher)) = (template, data_hasher) {
        progress.report(Step::Signing, 100);
        let sig = template.sign(data_hasher.finish(), key)?;
        write_packet(&mut container, PacketType::Signature, &sig.to_bytes())?;
    }
    container.finish()?;

    progress.report(Step::Done, 100);
    info!(
        bytes = written,
        recipients = recipients.len(),
        symmetric = options.symmetric_passphrase.is_some(),
        signed = signer.is_some(),
        "Encrypted message"
    );
    Ok(())
}
