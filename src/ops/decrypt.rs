//! Decryption pipeline.
//!
//! Accepts armored or binary input holding a public-key or passphrase
//! encrypted message (SEIPD, or legacy SED), or an unencrypted signed or
//! literal message. Plaintext is streamed to the output as it is decrypted,
//! so integrity and signature results only become known at the end and never
//! retract what was already written.

use std::io::{Read, Write};
use tracing::{debug, info, warn};

use super::progress::{Progress, Step};
use super::{
    check_signature, packet_source, pump, DataHasher, SignatureOutcome, SignatureStatus,
};
use crate::cache::SYMMETRIC_KEY_ID;
use crate::context::Context;
use crate::crypto::Passphrase;
use crate::error::{PgpkitError, Result};
use crate::packet::stream::{decompressor, SedReader, SeipdReader, QUICK_CHECK_FAILED};
use crate::packet::{
    BodyReader, LiteralHeader, OnePassSignature, PacketHeader, PacketType,
    PublicKeyEncryptedSessionKey, SessionKey, SignaturePacket, SymmetricKeyEncryptedSessionKey,
};
use crate::store::KeyStoreExt;
use crate::validation::Validator;

/// Parameters of one decryption
#[derive(Debug, Clone, Default)]
pub struct DecryptOptions {
    /// Passphrase for the session (symmetric) or the recipient key; falls back
    /// to the passphrase cache when absent
    pub passphrase: Option<Passphrase>,
    /// Use the passphrase packet even when public-key packets are present
    pub assume_symmetric: bool,
    /// Input size, used only for progress reporting
    pub input_size: Option<u64>,
}

/// Integrity of the decrypted payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// The modification detection code matched
    Verified,
    /// The modification detection code was missing or wrong
    Failed,
    /// The message carried no integrity protection
    NotProtected,
}

#[derive(Debug, Clone)]
pub struct DecryptOutcome {
    pub literal: LiteralHeader,
    pub signatures: Vec<SignatureOutcome>,
    pub integrity: IntegrityStatus,
    /// Whether the session key came from a passphrase
    pub symmetric: bool,
    /// Key that decrypted the session key, for public-key messages
    pub recipient: Option<u64>,
    /// Plaintext bytes written to the output
    pub bytes: u64,
}

/// Session key packets preceding the encrypted data
#[derive(Default)]
struct SessionPackets {
    public: Vec<PublicKeyEncryptedSessionKey>,
    symmetric: Vec<SymmetricKeyEncryptedSessionKey>,
}

/// How the session key was obtained
struct Unlocked {
    session: SessionKey,
    symmetric: bool,
    recipient: Option<u64>,
    /// Passphrase to cache once the session key proves correct
    passphrase: Option<Passphrase>,
}

/// Decrypts `input` into `output`.
pub fn decrypt(
    ctx: &Context,
    input: &mut dyn Read,
    output: &mut dyn Write,
    options: &DecryptOptions,
    progress: &Progress<'_>,
) -> Result<DecryptOutcome> {
    ctx.store.ensure_ready()?;
    let mut source = packet_source(input)?;

    progress.report(Step::PreparingKeys, 0);
    let mut packets = SessionPackets::default();
    let data_header = loop {
        progress.check()?;
        let header = PacketHeader::read(&mut source)?
            .ok_or_else(|| PgpkitError::invalid_data("no encrypted data found"))?;
        match header.packet_type() {
            Some(PacketType::PublicKeyEncryptedSessionKey) => {
                let body = BodyReader::new(&mut source, header.length).read_to_vec()?;
                match PublicKeyEncryptedSessionKey::parse(&body) {
                    Ok(pkesk) => packets.public.push(pkesk),
                    Err(e) => warn!(error = %e, "Skipping unreadable public-key session packet"),
                }
            }
            Some(PacketType::SymmetricKeyEncryptedSessionKey) => {
                let body = BodyReader::new(&mut source, header.length).read_to_vec()?;
                packets
                    .symmetric
                    .push(SymmetricKeyEncryptedSessionKey::parse(&body)?);
            }
            Some(PacketType::Marker) => {
                BodyReader::new(&mut source, header.length).drain()?;
            }
            Some(PacketType::SymEncryptedIntegrityProtectedData)
            | Some(PacketType::SymmetricallyEncryptedData) => break header,
            _ if packets.public.is_empty() && packets.symmetric.is_empty() => {
                debug!(tag = header.tag, "Input is not encrypted");
                return plain_message(ctx, &mut source, header, output, options, progress);
            }
            _ => {
                return Err(PgpkitError::invalid_data(format!(
                    "unexpected packet type {} before encrypted data",
                    header.tag
                )))
            }
        }
    };

    let unlocked = unlock_session(ctx, &packets, options)?;
    let symmetric = unlocked.symmetric;
    let body = BodyReader::new(&mut source, data_header.length);
    let mut state = MessageState::new(ctx, output, options, progress);

    let integrity = if data_header.packet_type() == Some(PacketType::SymEncryptedIntegrityProtectedData) {
        let mut reader = SeipdReader::new(body, &unlocked.session)
            .map_err(|e| session_error(ctx, e, symmetric))?;
        remember_passphrase(ctx, &unlocked);
        state.process(&mut reader, None, 1)?;
        if reader.finish()? {
            IntegrityStatus::Verified
        } else {
            warn!("Integrity check failed: modification detected");
            IntegrityStatus::Failed
        }
    } else {
        warn!("Message is not integrity protected");
        let mut reader = SedReader::new(body, &unlocked.session)
            .map_err(|e| session_error(ctx, e, symmetric))?;
        remember_passphrase(ctx, &unlocked);
        state.process(&mut reader, None, 1)?;
        IntegrityStatus::NotProtected
    };

    let outcome = state.finish(integrity, symmetric, unlocked.recipient)?;
    info!(
        bytes = outcome.bytes,
        symmetric,
        signatures = outcome.signatures.len(),
        integrity = ?outcome.integrity,
        "Decrypted message"
    );
    Ok(outcome)
}

/// Unencrypted message whose first packet header was already read
fn plain_message(
    ctx: &Context,
    source: &mut dyn Read,
    first: PacketHeader,
    output: &mut dyn Write,
    options: &DecryptOptions,
    progress: &Progress<'_>,
) -> Result<DecryptOutcome> {
    let mut state = MessageState::new(ctx, output, options, progress);
    state.process(source, Some(first), 1)?;
    let outcome = state.finish(IntegrityStatus::NotProtected, false, None)?;
    info!(
        bytes = outcome.bytes,
        signatures = outcome.signatures.len(),
        "Read unencrypted message"
    );
    Ok(outcome)
}

/// A failed quick check after a passphrase-derived session key means the
/// passphrase was wrong; a cached one is dropped so the next attempt prompts.
fn session_error(ctx: &Context, err: PgpkitError, symmetric: bool) -> PgpkitError {
    match err {
        PgpkitError::CorruptData(msg) if symmetric && msg == QUICK_CHECK_FAILED => {
            ctx.cache.invalidate(SYMMETRIC_KEY_ID);
            PgpkitError::WrongPassphrase
        }
        other => other,
    }
}

fn remember_passphrase(ctx: &Context, unlocked: &Unlocked) {
    if let (true, Some(passphrase)) = (unlocked.symmetric, &unlocked.passphrase) {
        ctx.cache.set(SYMMETRIC_KEY_ID, passphrase.clone());
    }
}

fn unlock_session(ctx: &Context, packets: &SessionPackets, options: &DecryptOptions) -> Result<Unlocked> {
    if !options.assume_symmetric && !packets.public.is_empty() {
        match unlock_public(ctx, packets, options)? {
            Some(unlocked) => return Ok(unlocked),
            None if packets.symmetric.is_empty() => return Err(PgpkitError::NoSecretKeyFound),
            None => debug!("No recipient key available, trying passphrase"),
        }
    }
    unlock_symmetric(ctx, packets, options)
}

/// Session key from the first recipient whose secret key is stored
fn unlock_public(
    ctx: &Context,
    packets: &SessionPackets,
    options: &DecryptOptions,
) -> Result<Option<Unlocked>> {
    for pkesk in &packets.public {
        let Some(ring) = ctx.secret_ring(pkesk.key_id)? else {
            debug!(key_id = format!("{:016X}", pkesk.key_id), "No secret key for recipient");
            continue;
        };
        let key = ctx.unlock(&ring, pkesk.key_id, options.passphrase.as_ref())?;
        let session = pkesk.decrypt(&key)?;
        debug!(
            key_id = format!("{:016X}", pkesk.key_id),
            cipher = %session.algorithm(),
            "Recovered session key"
        );
        return Ok(Some(Unlocked {
            session,
            symmetric: false,
            recipient: Some(pkesk.key_id),
            passphrase: None,
        }));
    }
    Ok(None)
}

fn unlock_symmetric(
    ctx: &Context,
    packets: &SessionPackets,
    options: &DecryptOptions,
) -> Result<Unlocked> {
    if packets.symmetric.is_empty() {
        return Err(PgpkitError::NoSymmetricEncryptionPacket);
    }
    let passphrase = ctx
        .passphrase_for(SYMMETRIC_KEY_ID, options.passphrase.as_ref())
        .ok_or(PgpkitError::PassphraseRequired {
            key_id: SYMMETRIC_KEY_ID,
        })?;
    let mut last_error = PgpkitError::WrongPassphrase;
    for skesk in &packets.symmetric {
        match skesk.decrypt(&passphrase) {
            Ok(session) => {
                return Ok(Unlocked {
                    session,
                    symmetric: true,
                    recipient: None,
                    passphrase: Some(passphrase),
                })
            }
            Err(e) => last_error = e,
        }
    }
    if matches!(last_error, PgpkitError::WrongPassphrase) {
        ctx.cache.invalidate(SYMMETRIC_KEY_ID);
    }
    Err(last_error)
}

/// Signature whose data is still being hashed
struct PendingSignature {
    key_id: u64,
    hasher: DataHasher,
    /// Set for signatures that preceded the data; one-pass entries wait for theirs
    signature: Option<SignaturePacket>,
}

/// Walks the decrypted packet sequence, writing literal data and tracking signatures
struct MessageState<'c, 'o, 'p> {
    ctx: &'c Context,
    output: &'o mut dyn Write,
    options: &'c DecryptOptions,
    progress: &'c Progress<'p>,
    pending: Vec<PendingSignature>,
    signatures: Vec<SignatureOutcome>,
    literal: Option<LiteralHeader>,
    bytes: u64,
}

impl<'c, 'o, 'p> MessageState<'c, 'o, 'p> {
    fn new(
        ctx: &'c Context,
        output: &'o mut dyn Write,
        options: &'c DecryptOptions,
        progress: &'c Progress<'p>,
    ) -> Self {
        Self {
            ctx,
            output,
            options,
            progress,
            pending: Vec::new(),
            signatures: Vec::new(),
            literal: None,
            bytes: 0,
        }
    }

    fn process(&mut self, reader: &mut dyn Read, first: Option<PacketHeader>, depth: usize) -> Result<()> {
        Validator::validate_nesting_depth(depth)?;
        let mut next = first;
        loop {
            self.progress.check()?;
            let header = match next.take() {
                Some(header) => header,
                None => match PacketHeader::read(reader)? {
                    Some(header) => header,
                    None => return Ok(()),
                },
            };
            let mut body = BodyReader::new(&mut *reader, header.length);
            match header.packet_type() {
                Some(PacketType::CompressedData) => {
                    {
                        let mut inner = decompressor(&mut body)?;
                        self.process(&mut inner, None, depth + 1)?;
                    }
                    body.drain()?;
                }
                Some(PacketType::OnePassSignature) => {
                    let one_pass = OnePassSignature::parse(&body.read_to_vec()?)?;
                    debug!(key_id = format!("{:016X}", one_pass.key_id), "One-pass signature");
                    self.pending.push(PendingSignature {
                        key_id: one_pass.key_id,
                        hasher: DataHasher::for_type(one_pass.sig_type, one_pass.hash),
                        signature: None,
                    });
                }
                Some(PacketType::Signature) => {
                    let signature = SignaturePacket::parse(&body.read_to_vec()?)?;
                    self.signature(signature)?;
                }
                Some(PacketType::LiteralData) => self.literal_data(&mut body)?,
                _ => {
                    debug!(tag = header.tag, "Skipping packet");
                    body.drain()?;
                }
            }
        }
    }

    fn literal_data(&mut self, body: &mut dyn Read) -> Result<()> {
        if self.literal.is_some() {
            return Err(PgpkitError::invalid_data("more than one literal data packet"));
        }
        let header = LiteralHeader::read_from(&mut *body)?;
        debug!(filename = %header.filename, format = ?header.format, "Literal data");
        let output = &mut *self.output;
        let pending = &mut self.pending;
        self.bytes = pump(
            body,
            self.ctx.config.chunk_size,
            self.progress,
            Step::Decrypting,
            self.options.input_size,
            |chunk| {
                output.write_all(chunk)?;
                for entry in pending.iter_mut() {
                    entry.hasher.update(chunk);
                }
                Ok(())
            },
        )?;
        self.literal = Some(header);
        Ok(())
    }

    fn signature(&mut self, signature: SignaturePacket) -> Result<()> {
        if self.literal.is_none() {
            // Signature preceding the data it covers
            self.pending.push(PendingSignature {
                key_id: signature.issuer().unwrap_or(0),
                hasher: DataHasher::for_type(signature.sig_type(), signature.hash_algorithm()),
                signature: Some(signature),
            });
            return Ok(());
        }
        let Some(pos) = self.pending.iter().rposition(|p| p.signature.is_none()) else {
            warn!("Ignoring signature without matching one-pass packet");
            return Ok(());
        };
        let entry = self.pending.remove(pos);
        self.progress.report(Step::Verifying, 0);
        let outcome = if signature.issuer() == Some(entry.key_id) {
            check_signature(self.ctx, &signature, entry.key_id, entry.hasher.finish())?
        } else {
            warn!(
                expected = format!("{:016X}", entry.key_id),
                "Signature issuer does not match one-pass packet"
            );
            SignatureOutcome::new(entry.key_id, SignatureStatus::Failed, Some(&signature))
        };
        self.signatures.push(outcome);
        Ok(())
    }

    fn finish(
        mut self,
        integrity: IntegrityStatus,
        symmetric: bool,
        recipient: Option<u64>,
    ) -> Result<DecryptOutcome> {
        let literal = self
            .literal
            .take()
            .ok_or_else(|| PgpkitError::invalid_data("no literal data found"))?;
        for entry in std::mem::take(&mut self.pending) {
            let outcome = match entry.signature {
                Some(signature) => {
                    check_signature(self.ctx, &signature, entry.key_id, entry.hasher.finish())?
                }
                None => {
                    warn!(key_id = format!("{:016X}", entry.key_id), "One-pass signature never completed");
                    SignatureOutcome::new(entry.key_id, SignatureStatus::Failed, None)
                }
            };
            self.signatures.push(outcome);
        }
        self.progress.report(Step::Done, 100);
        Ok(DecryptOutcome {
            literal,
            signatures: self.signatures,
            integrity,
            symmetric,
            recipient,
            bytes: self.bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::encrypt::{encrypt, EncryptOptions};
    use crate::store::tests::{fast_config, sample_ring};

    fn encrypt_to(ctx: &Context, data: &[u8], options: &EncryptOptions) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt(ctx, &mut &data[..], &mut out, options, &Progress::none()).unwrap();
        out
    }

    fn decrypt_with(ctx: &Context, data: &[u8], options: &DecryptOptions) -> Result<(Vec<u8>, DecryptOutcome)> {
        let mut out = Vec::new();
        let outcome = decrypt(ctx, &mut &data[..], &mut out, options, &Progress::none())?;
        Ok((out, outcome))
    }

    #[test]
    fn test_symmetric_round_trip_and_cache() {
        let ctx = Context::in_memory(fast_config());
        let options = EncryptOptions {
            symmetric_passphrase: Some(Passphrase::from("hunter2")),
            armor: true,
            ..Default::default()
        };
        let message = encrypt_to(&ctx, b"attack at dawn", &options);
        ctx.cache.clear();

        let (plain, outcome) = decrypt_with(
            &ctx,
            &message,
            &DecryptOptions {
                passphrase: Some(Passphrase::from("hunter2")),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plain, b"attack at dawn");
        assert!(outcome.symmetric);
        assert_eq!(outcome.integrity, IntegrityStatus::Verified);

        // Second decryption uses the cached passphrase
        let (plain, _) = decrypt_with(&ctx, &message, &DecryptOptions::default()).unwrap();
        assert_eq!(plain, b"attack at dawn");
    }

    #[test]
    fn test_symmetric_wrong_and_missing_passphrase() {
        let ctx = Context::in_memory(fast_config());
        let options = EncryptOptions {
            symmetric_passphrase: Some(Passphrase::from("right")),
            ..Default::default()
        };
        let message = encrypt_to(&ctx, b"payload", &options);
        ctx.cache.clear();

        assert!(matches!(
            decrypt_with(&ctx, &message, &DecryptOptions::default()),
            Err(PgpkitError::PassphraseRequired { key_id: SYMMETRIC_KEY_ID })
        ));
        let wrong = DecryptOptions {
            passphrase: Some(Passphrase::from("wrong")),
            ..Default::default()
        };
        assert!(matches!(
            decrypt_with(&ctx, &message, &wrong),
            Err(PgpkitError::WrongPassphrase)
        ));
        assert!(ctx.cache.is_empty());
    }

    #[test]
    fn test_public_key_round_trip_with_signature() {
        let ctx = Context::in_memory(fast_config());
        let ring = sample_ring("pw");
        let id = ring.master_key_id();
        ctx.store.save_secret_ring(&ring).unwrap();
        ctx.store.save_public_ring(&ring.to_public()).unwrap();

        let options = EncryptOptions {
            recipients: vec![id],
            signer: Some(id),
            signer_passphrase: Some(Passphrase::from("pw")),
            text_mode: true,
            filename: "note.txt".into(),
            ..Default::default()
        };
        let message = encrypt_to(&ctx, b"line one\nline two\n", &options);
        let (plain, outcome) = decrypt_with(&ctx, &message, &DecryptOptions::default()).unwrap();
        assert_eq!(plain, b"line one\nline two\n");
        assert_eq!(outcome.literal.filename, "note.txt");
        assert_eq!(outcome.recipient, ring.encryption_key_id());
        assert_eq!(outcome.signatures.len(), 1);
        assert_eq!(outcome.signatures[0].status, SignatureStatus::Verified);
        assert_eq!(outcome.signatures[0].key_id, id);
    }

    #[test]
    fn test_no_secret_key_and_no_symmetric_packet() {
        let sender = Context::in_memory(fast_config());
        let ring = sample_ring("pw");
        sender.store.save_public_ring(&ring.to_public()).unwrap();
        let message = encrypt_to(
            &sender,
            b"x",
            &EncryptOptions {
                recipients: vec![ring.master_key_id()],
                ..Default::default()
            },
        );

        let receiver = Context::in_memory(fast_config());
        assert!(matches!(
            decrypt_with(&receiver, &message, &DecryptOptions::default()),
            Err(PgpkitError::NoSecretKeyFound)
        ));
        let symmetric = DecryptOptions {
            assume_symmetric: true,
            passphrase: Some(Passphrase::from("pw")),
            ..Default::default()
        };
        assert!(matches!(
            decrypt_with(&receiver, &message, &symmetric),
            Err(PgpkitError::NoSymmetricEncryptionPacket)
        ));
    }

    #[test]
    fn test_empty_and_garbage_input() {
        let ctx = Context::in_memory(fast_config());
        assert!(matches!(
            decrypt_with(&ctx, b"", &DecryptOptions::default()),
            Err(PgpkitError::InvalidData(_))
        ));
        assert!(decrypt_with(&ctx, &[0xFF, 0x00, 0x13, 0x37], &DecryptOptions::default()).is_err());
        assert!(decrypt_with(&ctx, b"not a pgp message", &DecryptOptions::default()).is_err());
    }
}
