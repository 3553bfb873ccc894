//! Basic pgpkit Usage Example
//!
//! This example generates a key ring, encrypts and decrypts a message to it,
//! and produces and checks a cleartext signature.
//!
//! Run with: cargo run --example basic_usage

use pgpkit::crypto::{KeyUsage, Passphrase, PublicKeyAlgorithm};
use pgpkit::keyring::{build_secret_key, create_key, KeySpec};
use pgpkit::ops::{self, DecryptOptions, EncryptOptions, Progress, SignOptions, Step};
use pgpkit::store::KeyStoreExt;
use pgpkit::{Context, EngineConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 Basic pgpkit Usage Example");
    println!("=============================");
    println!();

    let ctx = Context::in_memory(EngineConfig::default());
    let passphrase = Passphrase::from("correct horse battery staple");

    // Generate a master key and an encryption subkey
    println!("📊 Step 1: Generating an RSA key ring...");
    let master = create_key(&ctx.config, PublicKeyAlgorithm::Rsa, 2048, &passphrase, None)?;
    let ring = create_key(
        &ctx.config,
        PublicKeyAlgorithm::Rsa,
        2048,
        &passphrase,
        Some((&master, &passphrase)),
    )?;
    let specs = vec![
        KeySpec {
            key: ring.primary().clone(),
            usage: KeyUsage::certify_sign(),
            expiry_days: None,
        },
        KeySpec {
            key: ring.subkeys()[0].key.clone(),
            usage: KeyUsage::encrypt_only(),
            expiry_days: Some(365),
        },
    ];
    let (secret, public) = build_secret_key(
        &ctx.config,
        &["Alice Example <alice@example.com>".to_string()],
        &specs,
        ring.master_key_id(),
        &passphrase,
        &passphrase,
    )?;
    ctx.store.save_secret_ring(&secret)?;
    ctx.store.save_public_ring(&public)?;
    println!("✅ Generated key ring:");
    println!("   {}", public);
    println!();

    // Encrypt to the new key and decrypt again
    println!("🔑 Step 2: Encryption and decryption...");
    let message = b"Hello, OpenPGP world!";
    let report = |step: Step, percent: u8| println!("   {:?}: {}%", step, percent);
    let mut encrypted = Vec::new();
    ops::encrypt(
        &ctx,
        &mut &message[..],
        &mut encrypted,
        &EncryptOptions {
            armor: true,
            recipients: vec![public.master_key_id()],
            ..EncryptOptions::default()
        },
        &Progress::new(&report),
    )?;
    println!("🔒 Encrypted message:\n{}", String::from_utf8_lossy(&encrypted));

    let mut decrypted = Vec::new();
    let outcome = ops::decrypt(
        &ctx,
        &mut &encrypted[..],
        &mut decrypted,
        &DecryptOptions {
            passphrase: Some(passphrase.clone()),
            ..DecryptOptions::default()
        },
        &Progress::none(),
    )?;
    assert_eq!(message, decrypted.as_slice());
    println!(
        "✅ Decrypted \"{}\" (integrity: {:?})",
        String::from_utf8_lossy(&decrypted),
        outcome.integrity
    );
    println!();

    // Cleartext signature; the passphrase is still cached from decryption
    println!("✍️ Step 3: Cleartext signing and verification...");
    let mut signed = Vec::new();
    ops::sign_cleartext(
        &ctx,
        &mut &b"I agree to the terms.\n"[..],
        &mut signed,
        &SignOptions::new(secret.master_key_id()),
        &Progress::none(),
    )?;
    println!("{}", String::from_utf8_lossy(&signed));

    let mut text = Vec::new();
    let verified = ops::verify_cleartext(&ctx, &mut &signed[..], &mut text, &Progress::none())?;
    println!(
        "✅ Signature verified: {} ({} signature(s))",
        verified.all_verified(),
        verified.signatures.len()
    );

    Ok(())
}
