//! Long-running engine operations.
//!
//! Every operation takes the engine [`Context`], streams its payload from a
//! reader to a writer, reports through [`Progress`], and returns a typed
//! outcome. Output already written when an operation fails is not retracted.

pub mod decrypt;
pub mod encrypt;
pub mod import;
pub mod progress;
pub mod sign;

pub use decrypt::{decrypt, DecryptOptions, DecryptOutcome, IntegrityStatus};
pub use encrypt::{encrypt, EncryptOptions};
pub use import::{
    export_key_rings, fetch_from_keyserver, import_key_rings, upload_to_keyserver, ImportOutcome,
};
pub use progress::{CancelToken, NoProgress, Progress, ProgressReporter, Step};
pub use sign::{
    sign_cleartext, sign_detached, sign_inline, verify_cleartext, verify_detached, SignOptions,
    VerifyOutcome,
};

use std::io::{self, BufRead, BufReader, Read};
use tracing::debug;

use crate::armor::ArmorReader;
use crate::context::Context;
use crate::crypto::hash::Hasher;
use crate::crypto::{HashAlgorithm, Passphrase};
use crate::error::{PgpkitError, Result};
use crate::keyring::SecretKeyRing;
use crate::packet::canonical::Canonicalizer;
use crate::packet::{
    timestamp_now, PublicKeyPacket, SignaturePacket, SignatureType, Subpacket, UnlockedKey,
};
use crate::store::KeyStoreExt;

/// Result of checking one signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    Verified,
    Failed,
    /// No public key for the issuer is stored; the caller may fetch it and retry
    SignerUnknown(u64),
}

impl SignatureStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// One checked signature and what it claims about its signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutcome {
    pub key_id: u64,
    pub status: SignatureStatus,
    pub created: u32,
    pub signer_user_id: Option<String>,
}

impl SignatureOutcome {
    fn new(key_id: u64, status: SignatureStatus, sig: Option<&SignaturePacket>) -> Self {
        Self {
            key_id,
            status,
            created: sig.map_or(0, |s| s.created()),
            signer_user_id: sig.and_then(|s| s.signer_user_id()).map(str::to_string),
        }
    }
}

/// Running hash over signed data, canonicalizing text when required
pub(crate) struct DataHasher {
    hasher: Hasher,
    canon: Option<Canonicalizer>,
    scratch: Vec<u8>,
}

impl DataHasher {
    pub(crate) fn new(hasher: Hasher, canon: Option<Canonicalizer>) -> Self {
        Self {
            hasher,
            canon,
            scratch: Vec::new(),
        }
    }

    /// Hasher for a signature type: text signatures hash CRLF-canonical text
    pub(crate) fn for_type(sig_type: SignatureType, hash: HashAlgorithm) -> Self {
        let canon = (sig_type == SignatureType::Text).then(Canonicalizer::crlf);
        Self::new(Hasher::new(hash), canon)
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match &mut self.canon {
            Some(canon) => {
                self.scratch.clear();
                canon.update(data, &mut self.scratch);
                self.hasher.update(&self.scratch);
            }
            None => self.hasher.update(data),
        }
    }

    pub(crate) fn finish(mut self) -> Hasher {
        if let Some(canon) = &mut self.canon {
            canon.finish();
        }
        self.hasher
    }
}

/// Streams `input` in `chunk_size` pieces into `sink`, checking for cancellation
pub(crate) fn pump(
    input: &mut dyn Read,
    chunk_size: usize,
    progress: &Progress<'_>,
    step: progress::Step,
    total: Option<u64>,
    mut sink: impl FnMut(&[u8]) -> Result<()>,
) -> Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut done = 0u64;
    loop {
        progress.check()?;
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        sink(&buf[..n])?;
        done += n as u64;
        progress.report_bytes(step, done, total);
    }
    Ok(done)
}

/// Binary packet stream of `input`, unwrapping ASCII armor when present.
///
/// Binary OpenPGP data always starts with a byte that has the high bit set.
pub(crate) fn packet_source<'a>(input: &'a mut dyn Read) -> Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(input);
    let first = match buffered.fill_buf()?.first() {
        Some(&byte) => byte,
        None => return Err(PgpkitError::invalid_data("empty input")),
    };
    if first & 0x80 == 0 {
        debug!("Input is ASCII armored");
        return Ok(Box::new(ArmorReader::new(buffered)?));
    }
    Ok(Box::new(buffered))
}

/// Public key packet of any stored key with this ID
pub(crate) fn lookup_public_key(ctx: &Context, key_id: u64) -> Result<Option<PublicKeyPacket>> {
    if let Some(ring) = ctx.store.public_ring(key_id)? {
        return Ok(ring.key_packet(key_id).cloned());
    }
    Ok(ctx
        .store
        .secret_ring(key_id)?
        .and_then(|ring| ring.key_packet(key_id).map(|k| k.public().clone())))
}

/// Checks a completed data hash against a signature
pub(crate) fn check_signature(
    ctx: &Context,
    sig: &SignaturePacket,
    key_id: u64,
    hasher: Hasher,
) -> Result<SignatureOutcome> {
    let status = match lookup_public_key(ctx, key_id)? {
        None => SignatureStatus::SignerUnknown(key_id),
        Some(signer) => match sig.verify(hasher, &signer) {
            Ok(true) => SignatureStatus::Verified,
            Ok(false) => SignatureStatus::Failed,
            Err(e) => {
                debug!(key_id = format!("{:016X}", key_id), error = %e, "Signature check failed");
                SignatureStatus::Failed
            }
        },
    };
    debug!(key_id = format!("{:016X}", key_id), status = ?status, "Checked signature");
    Ok(SignatureOutcome::new(key_id, status, Some(sig)))
}

/// Resolves and unlocks the signing key of the ring holding `signer_key_id`
pub(crate) fn unlock_signer(
    ctx: &Context,
    signer_key_id: u64,
    passphrase: Option<&Passphrase>,
) -> Result<(SecretKeyRing, UnlockedKey)> {
    let ring = ctx
        .secret_ring(signer_key_id)?
        .ok_or(PgpkitError::NoSignatureKey)?;
    let key_id = ring.signing_key_id().ok_or(PgpkitError::SignatureFailed)?;
    let key = ctx
        .unlock(&ring, key_id, passphrase)
        .map_err(|e| match e {
            PgpkitError::PassphraseRequired { .. } => PgpkitError::NoSignaturePassphrase,
            other => other,
        })?;
    Ok((ring, key))
}

/// Unsigned data signature template for `key`
pub(crate) fn data_signature(
    ring: &SecretKeyRing,
    key: &UnlockedKey,
    sig_type: SignatureType,
    hash: HashAlgorithm,
    legacy: bool,
) -> SignaturePacket {
    let created = timestamp_now();
    if legacy {
        return SignaturePacket::new_v3(sig_type, key.public(), hash, created);
    }
    let mut hashed = vec![Subpacket::SignatureCreationTime(created)];
    if let Some(user_id) = ring.main_user_id().filter(|uid| !uid.is_empty()) {
        hashed.push(Subpacket::SignerUserId(user_id.to_string()));
    }
    SignaturePacket::new_v4(sig_type, key.public(), hash, hashed)
}
