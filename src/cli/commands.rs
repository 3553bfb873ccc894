//! Command implementations for the pgpkit CLI.

use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::cache::SYMMETRIC_KEY_ID;
use crate::cli::args::{HashChoice, KeyAlgorithm, KeyserverAction, SignMode};
use crate::cli::utils::{
    format_fingerprint, format_key_id, format_timestamp, input_size, open_input, open_output,
    parse_key_id, parse_key_ids, prompt_new_passphrase, prompt_passphrase,
};
use crate::context::Context;
use crate::crypto::{KeyUsage, Passphrase};
use crate::error::{PgpkitError, Result};
use crate::keyring::{
    build_secret_key, certify_user_id, change_passphrase, create_key, KeyPacket, KeyRing,
    KeyRingKind, KeySpec,
};
use crate::keyserver::{HkpKeyServer, DEFAULT_KEYSERVER_URL};
use crate::ops::{
    self, DecryptOptions, EncryptOptions, IntegrityStatus, Progress, SignOptions,
    SignatureOutcome, SignatureStatus, Step,
};
use crate::store::KeyStoreExt;

fn log_progress(step: Step, percent: u8) {
    debug!(step = ?step, percent, "Progress");
}

fn kind(secret: bool) -> KeyRingKind {
    if secret {
        KeyRingKind::Secret
    } else {
        KeyRingKind::Public
    }
}

/// Runs `op` with the cached passphrase; prompts and retries once if that
/// is not enough
fn with_passphrase<T>(
    prompt: &str,
    mut op: impl FnMut(Option<&Passphrase>) -> Result<T>,
) -> Result<T> {
    match op(None) {
        Err(e) if e.needs_passphrase() => {
            let label = match &e {
                PgpkitError::PassphraseRequired { key_id } if *key_id != SYMMETRIC_KEY_ID => {
                    format!("Passphrase for key {}", format_key_id(*key_id))
                }
                _ => prompt.to_string(),
            };
            let passphrase = prompt_passphrase(&label)?;
            op(Some(&passphrase))
        }
        other => other,
    }
}

/// Execute generate-key command
pub fn generate_key(
    ctx: &Context,
    user_ids: &[String],
    algorithm: KeyAlgorithm,
    bits: usize,
    subkey_algorithm: Option<KeyAlgorithm>,
    expire_days: u32,
    no_passphrase: bool,
) -> Result<()> {
    let passphrase = if no_passphrase {
        Passphrase::empty()
    } else {
        prompt_new_passphrase("Passphrase for the new key")?
    };
    let subkey_algorithm = subkey_algorithm.unwrap_or(match algorithm {
        KeyAlgorithm::Dsa => KeyAlgorithm::Elgamal,
        _ => KeyAlgorithm::Rsa,
    });

    info!(algorithm = ?algorithm, bits, "Generating master key");
    let master = create_key(&ctx.config, algorithm.into(), bits, &passphrase, None)?;
    info!(algorithm = ?subkey_algorithm, bits, "Generating subkey");
    let ring = create_key(
        &ctx.config,
        subkey_algorithm.into(),
        bits,
        &passphrase,
        Some((&master, &passphrase)),
    )?;

    let expiry_days = (expire_days > 0).then_some(expire_days);
    let mut specs = vec![KeySpec {
        key: ring.primary().clone(),
        usage: KeyUsage::certify_sign(),
        expiry_days,
    }];
    for subkey in ring.subkeys() {
        let algorithm = subkey.key.public().algorithm();
        let usage = if algorithm.can_encrypt() {
            KeyUsage::encrypt_only()
        } else {
            KeyUsage::sign_only()
        };
        specs.push(KeySpec {
            key: subkey.key.clone(),
            usage,
            expiry_days,
        });
    }
    let (secret, public) = build_secret_key(
        &ctx.config,
        user_ids,
        &specs,
        ring.master_key_id(),
        &passphrase,
        &passphrase,
    )?;
    ctx.store.save_secret_ring(&secret)?;
    ctx.store.save_public_ring(&public)?;

    info!(
        key_id = format_key_id(secret.master_key_id()),
        fingerprint = format_fingerprint(secret.fingerprint()),
        user_id = %user_ids[0],
        "Generated key ring"
    );
    println!("{}", format_key_id(secret.master_key_id()));
    Ok(())
}

/// Execute add-subkey command
pub fn add_subkey(ctx: &Context, key_id: &str, algorithm: KeyAlgorithm, bits: usize) -> Result<()> {
    let key_id = parse_key_id(key_id)?;
    let ring = ctx
        .secret_ring(key_id)?
        .ok_or_else(|| PgpkitError::invalid_input(format!("no secret key {}", format_key_id(key_id))))?;
    let passphrase = if ring.is_protected() {
        prompt_passphrase("Passphrase of the master key")?
    } else {
        Passphrase::empty()
    };
    let ring = create_key(
        &ctx.config,
        algorithm.into(),
        bits,
        &passphrase,
        Some((&ring, &passphrase)),
    )?;
    ctx.store.save_secret_ring(&ring)?;
    ctx.store.save_public_ring(&ring.to_public())?;
    info!(key_id = format_key_id(ring.master_key_id()), "Added subkey");
    Ok(())
}

fn print_ring<K: KeyPacket>(ring: &KeyRing<K>, label: &str) {
    for key in ring.keys() {
        let mut line = format!(
            "{} {}{}/{} {}",
            if key.is_master() { label } else { "sub" },
            key.algorithm(),
            key.bit_strength(),
            format_key_id(key.key_id()),
            format_timestamp(key.created()),
        );
        line.push_str(&format!(" [{}]", key.usage()));
        if key.is_revoked() {
            line.push_str(" [revoked]");
        } else if let Some(expiry) = key.expiry() {
            let word = if key.is_expired() { "expired" } else { "expires" };
            line.push_str(&format!(" [{}: {}]", word, format_timestamp(expiry)));
        }
        println!("{}", line);
        if key.is_master() {
            println!("      {}", format_fingerprint(key.fingerprint()));
            for user_id in ring.user_ids().iter().filter(|uid| !uid.is_empty()) {
                println!("uid   {}", user_id);
            }
        }
    }
    println!();
}

/// Execute list-keys command
pub fn list_keys(ctx: &Context, secret: bool) -> Result<()> {
    ctx.store.ensure_ready()?;
    let kind = kind(secret);
    let ids = ctx.store.master_key_ids(kind)?;
    if ids.is_empty() {
        info!(kind = %kind, "No keys found");
        return Ok(());
    }
    for id in ids {
        let printed = if secret {
            ctx.store.secret_ring(id)?.map(|ring| print_ring(&ring, "sec"))
        } else {
            ctx.store.public_ring(id)?.map(|ring| print_ring(&ring, "pub"))
        };
        if printed.is_none() {
            warn!(key_id = format_key_id(id), "Stored ring disappeared while listing");
        }
    }
    Ok(())
}

/// Execute import command
pub fn import(ctx: &Context, file: &Path, secret: bool) -> Result<()> {
    let mut input = open_input(file)?;
    let outcome = ops::import_key_rings(ctx, &mut input, kind(secret), &Progress::new(&log_progress))?;
    info!(
        added = outcome.added,
        updated = outcome.updated,
        unchanged = outcome.unchanged,
        rejected = outcome.rejected,
        "Import finished"
    );
    Ok(())
}

/// Execute export command
pub fn export(ctx: &Context, key_ids: &[String], output: Option<&Path>, secret: bool, binary: bool) -> Result<()> {
    let ids = parse_key_ids(key_ids)?;
    let mut out = open_output(output)?;
    let count = ops::export_key_rings(ctx, &ids, kind(secret), !binary, &mut out)?;
    out.flush()?;
    if count == 0 {
        return Err(PgpkitError::invalid_input("no matching keys to export"));
    }
    Ok(())
}

/// Execute encrypt command
#[allow(clippy::too_many_arguments)]
pub fn encrypt(
    ctx: &Context,
    input: &Path,
    output: Option<&Path>,
    recipients: &[String],
    symmetric: bool,
    sign: Option<&str>,
    armor: bool,
    text: bool,
) -> Result<()> {
    let symmetric_passphrase = if symmetric {
        Some(prompt_new_passphrase("Passphrase for the message")?)
    } else {
        None
    };
    let filename = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut options = EncryptOptions {
        armor,
        recipients: parse_key_ids(recipients)?,
        symmetric_passphrase,
        signer: sign.map(parse_key_id).transpose()?,
        text_mode: text,
        filename,
        input_size: input_size(input),
        ..EncryptOptions::default()
    };
    let progress = Progress::new(&log_progress);

    with_passphrase("Passphrase of the signing key", |passphrase| {
        options.signer_passphrase = passphrase.cloned();
        let mut reader = open_input(input)?;
        let mut writer = open_output(output)?;
        ops::encrypt(ctx, &mut reader, &mut writer, &options, &progress)?;
        writer.flush()?;
        Ok(())
    })
}

fn report_signatures(signatures: &[SignatureOutcome]) -> bool {
    let mut all_good = !signatures.is_empty();
    for sig in signatures {
        match sig.status {
            SignatureStatus::Verified => info!(
                key_id = format_key_id(sig.key_id),
                signer = sig.signer_user_id.as_deref().unwrap_or(""),
                created = format_timestamp(sig.created),
                "Good signature"
            ),
            SignatureStatus::Failed => {
                all_good = false;
                warn!(key_id = format_key_id(sig.key_id), "BAD signature");
            }
            SignatureStatus::SignerUnknown(key_id) => {
                all_good = false;
                warn!(
                    key_id = format_key_id(key_id),
                    "Signer unknown; fetch the key with `pgpkit keyserver get` and retry"
                );
            }
        }
    }
    all_good
}

/// Execute decrypt command
pub fn decrypt(ctx: &Context, input: &Path, output: Option<&Path>, symmetric: bool) -> Result<()> {
    let progress = Progress::new(&log_progress);
    let outcome = with_passphrase("Passphrase", |passphrase| {
        let options = DecryptOptions {
            passphrase: passphrase.cloned(),
            assume_symmetric: symmetric,
            input_size: input_size(input),
        };
        let mut reader = open_input(input)?;
        let mut writer = open_output(output)?;
        let outcome = ops::decrypt(ctx, &mut reader, &mut writer, &options, &progress)?;
        writer.flush()?;
        Ok(outcome)
    })?;

    report_signatures(&outcome.signatures);
    match outcome.integrity {
        IntegrityStatus::Verified => debug!("Integrity protected message verified"),
        IntegrityStatus::NotProtected => warn!("Message was not integrity protected"),
        IntegrityStatus::Failed => {
            return Err(PgpkitError::corrupt_data("message was modified"));
        }
    }
    info!(bytes = outcome.bytes, filename = %outcome.literal.filename, "Decryption finished");
    Ok(())
}

/// Execute sign command
#[allow(clippy::too_many_arguments)]
pub fn sign(
    ctx: &Context,
    key_id: &str,
    input: &Path,
    output: Option<&Path>,
    mode: SignMode,
    hash: Option<HashChoice>,
    legacy: bool,
    text: bool,
    armor: bool,
) -> Result<()> {
    let mut options = SignOptions {
        hash_algorithm: hash.map(Into::into),
        legacy,
        text_mode: text,
        armor,
        input_size: input_size(input),
        filename: input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        ..SignOptions::new(parse_key_id(key_id)?)
    };
    let progress = Progress::new(&log_progress);

    with_passphrase("Passphrase of the signing key", |passphrase| {
        options.passphrase = passphrase.cloned();
        let mut reader = open_input(input)?;
        let mut writer = open_output(output)?;
        match mode {
            SignMode::Detached => ops::sign_detached(ctx, &mut reader, &mut writer, &options, &progress)?,
            SignMode::Cleartext => ops::sign_cleartext(ctx, &mut reader, &mut writer, &options, &progress)?,
            SignMode::Inline => ops::sign_inline(ctx, &mut reader, &mut writer, &options, &progress)?,
        }
        writer.flush()?;
        Ok(())
    })
}

/// Execute verify command
pub fn verify(ctx: &Context, input: &Path, signature: Option<&Path>) -> Result<()> {
    let progress = Progress::new(&log_progress);
    let mut data = open_input(input)?;
    let outcome = match signature {
        Some(signature) => {
            let mut signature = open_input(signature)?;
            ops::verify_detached(ctx, &mut data, &mut signature, &progress)?
        }
        None => ops::verify_cleartext(ctx, &mut data, &mut io::sink(), &progress)?,
    };
    if !report_signatures(&outcome.signatures) {
        return Err(PgpkitError::validation("signature verification failed"));
    }
    Ok(())
}

/// Execute passwd command
pub fn passwd(ctx: &Context, key_id: &str) -> Result<()> {
    let key_id = parse_key_id(key_id)?;
    let ring = ctx
        .secret_ring(key_id)?
        .ok_or_else(|| PgpkitError::invalid_input(format!("no secret key {}", format_key_id(key_id))))?;
    let old = if ring.is_protected() {
        prompt_passphrase("Current passphrase")?
    } else {
        Passphrase::empty()
    };
    let new = prompt_new_passphrase("New passphrase")?;
    let changed = change_passphrase(&ctx.config, &ring, &old, &new)?;

    // Replace rather than merge: merging keeps the stored secret material
    ctx.store.save_key_ring_data(
        KeyRingKind::Secret,
        changed.master_key_id(),
        &changed.key_ids(),
        &changed.to_bytes(),
    )?;
    ctx.cache.invalidate(changed.master_key_id());
    info!(key_id = format_key_id(changed.master_key_id()), "Changed passphrase");
    Ok(())
}

/// Execute certify command
pub fn certify(ctx: &Context, key_id: &str, user_id: &str, with: &str) -> Result<()> {
    let target_id = parse_key_id(key_id)?;
    let certifier_id = parse_key_id(with)?;
    let target = ctx
        .store
        .public_ring(target_id)?
        .ok_or_else(|| PgpkitError::invalid_input(format!("no public key {}", format_key_id(target_id))))?;
    let certifier = ctx
        .secret_ring(certifier_id)?
        .ok_or_else(|| PgpkitError::invalid_input(format!("no secret key {}", format_key_id(certifier_id))))?;

    let certified = with_passphrase("Passphrase of the certifying key", |passphrase| {
        let passphrase = match passphrase {
            Some(passphrase) => passphrase.clone(),
            None => ctx
                .passphrase_for(certifier.master_key_id(), None)
                .or_else(|| (!certifier.is_protected()).then(Passphrase::empty))
                .ok_or(PgpkitError::PassphraseRequired {
                    key_id: certifier.master_key_id(),
                })?,
        };
        certify_user_id(&ctx.config, &target, user_id, &certifier, &passphrase)
    })?;
    ctx.store.save_public_ring(&certified)?;
    info!(
        key_id = format_key_id(target_id),
        user_id,
        certifier = format_key_id(certifier_id),
        "Certified user ID"
    );
    Ok(())
}

/// Execute keyserver command
pub fn keyserver(ctx: &Context, url: Option<&str>, action: &KeyserverAction) -> Result<()> {
    let url = url
        .map(str::to_string)
        .or_else(|| ctx.config.keyserver_url.clone())
        .unwrap_or_else(|| DEFAULT_KEYSERVER_URL.to_string());
    let server = HkpKeyServer::new(url)?;
    match action {
        KeyserverAction::Get { key_id } => {
            let outcome = ops::fetch_from_keyserver(ctx, &server, parse_key_id(key_id)?, &Progress::new(&log_progress))?;
            info!(added = outcome.added, updated = outcome.updated, unchanged = outcome.unchanged, "Fetched key");
        }
        KeyserverAction::Send { key_id } => {
            if !ops::upload_to_keyserver(ctx, &server, parse_key_id(key_id)?)? {
                return Err(PgpkitError::key_server("server did not accept the key"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PublicKeyAlgorithm;
    use crate::store::tests::{fast_config, sample_ring};

    #[test]
    fn test_with_passphrase_passes_through() {
        let mut calls = 0;
        let result = with_passphrase("unused", |passphrase| {
            calls += 1;
            assert!(passphrase.is_none());
            Ok(5)
        });
        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls, 1);

        let result: Result<()> = with_passphrase("unused", |_| Err(PgpkitError::NoSecretKeyFound));
        assert!(matches!(result, Err(PgpkitError::NoSecretKeyFound)));
    }

    #[test]
    fn test_list_and_export_commands() {
        let ctx = Context::in_memory(fast_config());
        let ring = sample_ring("pw");
        ctx.store.save_public_ring(&ring.to_public()).unwrap();
        list_keys(&ctx, false).unwrap();
        list_keys(&ctx, true).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.asc");
        export(&ctx, &[], Some(&path), false, false).unwrap();
        let armored = std::fs::read_to_string(&path).unwrap();
        assert!(armored.starts_with("-----BEGIN PGP PUBLIC KEY BLOCK-----"));
        assert!(export(&ctx, &["0x1".to_string()], Some(&path), false, false).is_err());

        let other = Context::in_memory(fast_config());
        import(&other, &path, false).unwrap();
        assert!(other.store.public_ring(ring.master_key_id()).unwrap().is_some());
    }

    #[test]
    fn test_algorithm_mapping() {
        assert_eq!(PublicKeyAlgorithm::from(KeyAlgorithm::Elgamal), PublicKeyAlgorithm::ElGamal);
    }
}
