//! Adversarial tests for pgpkit
//!
//! These tests feed hostile or tampered input to the engine and verify that it
//! fails cleanly instead of returning unauthenticated data or exhausting
//! resources.

use pgpkit::{
    crypto::{Passphrase, ProtectionParams, PublicKeyAlgorithm},
    keyring::{create_key, KeyRingKind, PublicKeyRing},
    ops::{
        self, CancelToken, DecryptOptions, EncryptOptions, IntegrityStatus, Progress,
        SignOptions, SignatureStatus,
    },
    packet::{encode_packet, read_packet, DataFormat, LiteralHeader, PacketType},
    store::KeyStoreExt,
    validation::{Validator, MAX_PACKET_NESTING_DEPTH},
    Context, EngineConfig, PgpkitError,
};

fn test_context() -> Context {
    Context::in_memory(EngineConfig {
        protection: ProtectionParams {
            count: 0x10,
            ..ProtectionParams::default()
        },
        ..EngineConfig::default()
    })
}

fn literal_packet(data: &[u8]) -> Vec<u8> {
    let mut body = LiteralHeader::new(DataFormat::Binary, "", 0).to_bytes();
    body.extend_from_slice(data);
    encode_packet(PacketType::LiteralData, &body)
}

/// Wraps `inner` in `levels` uncompressed compressed-data packets
fn nest(inner: Vec<u8>, levels: usize) -> Vec<u8> {
    (0..levels).fold(inner, |packet, _| {
        let mut body = vec![0u8];
        body.extend_from_slice(&packet);
        encode_packet(PacketType::CompressedData, &body)
    })
}

fn read_message(ctx: &Context, message: &[u8], options: &DecryptOptions) -> pgpkit::Result<(Vec<u8>, IntegrityStatus)> {
    let mut out = Vec::new();
    let outcome = ops::decrypt(ctx, &mut &message[..], &mut out, options, &Progress::none())?;
    Ok((out, outcome.integrity))
}

fn symmetric_message(ctx: &Context, data: &[u8], passphrase: &str) -> Vec<u8> {
    let options = EncryptOptions {
        symmetric_passphrase: Some(Passphrase::from(passphrase)),
        ..EncryptOptions::default()
    };
    let mut out = Vec::new();
    ops::encrypt(ctx, &mut &data[..], &mut out, &options, &Progress::none()).unwrap();
    out
}

/// Test that deeply nested containers are refused
#[test]
fn test_nesting_depth_bomb() {
    let ctx = test_context();

    let shallow = nest(literal_packet(b"ok"), 3);
    let (data, integrity) = read_message(&ctx, &shallow, &DecryptOptions::default()).unwrap();
    assert_eq!(data, b"ok");
    assert_eq!(integrity, IntegrityStatus::NotProtected);

    let deep = nest(literal_packet(b"bomb"), MAX_PACKET_NESTING_DEPTH + 2);
    let result = read_message(&ctx, &deep, &DecryptOptions::default());
    assert!(matches!(result, Err(PgpkitError::Validation(_))));
}

/// Test that modified ciphertext is never reported as intact
#[test]
fn test_tampered_ciphertext_detected() {
    let ctx = test_context();
    let message = symmetric_message(&ctx, b"wire 100 coins to alice", "pw");
    let options = DecryptOptions {
        passphrase: Some(Passphrase::from("pw")),
        ..DecryptOptions::default()
    };

    // The last byte belongs to the modification detection code
    let mut tampered = message.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    let (_, integrity) = read_message(&ctx, &tampered, &options).expect("Payload still parses");
    assert_eq!(integrity, IntegrityStatus::Failed);

    // Bit flips in the body either break parsing or the integrity check
    for offset in [message.len() / 2, message.len() - 25] {
        let mut tampered = message.clone();
        tampered[offset] ^= 0x80;
        match read_message(&ctx, &tampered, &options) {
            Err(_) => {}
            Ok((_, integrity)) => assert_ne!(integrity, IntegrityStatus::Verified),
        }
    }
}

/// Test that truncated messages fail instead of returning partial data silently
#[test]
fn test_truncated_message() {
    let ctx = test_context();
    let message = symmetric_message(&ctx, &[0x42; 4096], "pw");
    let options = DecryptOptions {
        passphrase: Some(Passphrase::from("pw")),
        ..DecryptOptions::default()
    };

    for cut in [1, 10, message.len() / 2, message.len() - 1] {
        let result = read_message(&ctx, &message[..cut], &options);
        match result {
            Err(_) => {}
            Ok((_, integrity)) => assert_ne!(
                integrity,
                IntegrityStatus::Verified,
                "Truncation at {} bytes passed the integrity check",
                cut
            ),
        }
    }
}

/// Test that hostile length fields do not trigger huge allocations
#[test]
fn test_oversized_length_claims() {
    // Public key packet claiming a 2GB body
    let hostile = [0xC6, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF, 0x04];
    assert!(matches!(
        read_packet(&mut &hostile[..]),
        Err(PgpkitError::Validation(_))
    ));
    assert!(PublicKeyRing::from_bytes(&hostile).is_err());

    // Session key packet claiming far more data than present
    let ctx = test_context();
    let truncated = [0xC3, 0xFF, 0x00, 0x00, 0x10, 0x00, 0x04, 0x09];
    assert!(read_message(&ctx, &truncated, &DecryptOptions::default()).is_err());
}

/// Test that a message may carry only one literal data packet
#[test]
fn test_duplicate_literal_rejected() {
    let ctx = test_context();
    let mut message = literal_packet(b"first");
    message.extend_from_slice(&literal_packet(b"second"));
    assert!(read_message(&ctx, &message, &DecryptOptions::default()).is_err());
}

/// Test that a signature cannot be replayed over different data
#[test]
fn test_signature_replay() {
    let ctx = test_context();
    let ring = create_key(
        &ctx.config,
        PublicKeyAlgorithm::Rsa,
        1024,
        &Passphrase::empty(),
        None,
    )
    .unwrap();
    ctx.store.save_secret_ring(&ring).unwrap();
    ctx.store.save_public_ring(&ring.to_public()).unwrap();

    let mut signature = Vec::new();
    ops::sign_detached(
        &ctx,
        &mut &b"I owe Bob 5 coins"[..],
        &mut signature,
        &SignOptions::new(ring.master_key_id()),
        &Progress::none(),
    )
    .unwrap();

    let outcome = ops::verify_detached(
        &ctx,
        &mut &b"I owe Bob 500 coins"[..],
        &mut &signature[..],
        &Progress::none(),
    )
    .unwrap();
    assert_eq!(outcome.signatures[0].status, SignatureStatus::Failed);
    assert!(!outcome.all_verified());
}

/// Test that the wrong kind of key ring cannot be slipped into an import
#[test]
fn test_import_ignores_other_kind() {
    let ctx = test_context();
    let ring = create_key(
        &ctx.config,
        PublicKeyAlgorithm::Rsa,
        1024,
        &Passphrase::from("pw"),
        None,
    )
    .unwrap();

    let outcome = ops::import_key_rings(
        &ctx,
        &mut &ring.to_bytes()[..],
        KeyRingKind::Public,
        &Progress::none(),
    )
    .unwrap();
    assert_eq!(outcome.total(), 0);
    assert!(ctx.store.public_ring(ring.master_key_id()).unwrap().is_none());
    assert!(ctx.store.secret_ring(ring.master_key_id()).unwrap().is_none());
}

/// Test that control characters cannot be injected into user IDs
#[test]
fn test_user_id_injection() {
    let hostile = [
        "Eve\0<eve@example.com>",
        "Eve \u{1b}[31m<eve@example.com>",
        "Eve \u{7}<eve@example.com>",
    ];
    for user_id in hostile {
        assert!(
            Validator::validate_user_id(user_id).is_err(),
            "accepted {:?}",
            user_id
        );
    }
    assert!(Validator::validate_user_id(&"x".repeat(5000)).is_err());
    assert!(Validator::validate_user_id("Alice Example <alice@example.com>").is_ok());
}

/// Test that a cancelled operation stops before producing output
#[test]
fn test_cancellation() {
    let ctx = test_context();
    let message = symmetric_message(&ctx, b"cancel me", "pw");
    let token = CancelToken::new();
    token.cancel();

    let mut out = Vec::new();
    let result = ops::decrypt(
        &ctx,
        &mut &message[..],
        &mut out,
        &DecryptOptions {
            passphrase: Some(Passphrase::from("pw")),
            ..DecryptOptions::default()
        },
        &Progress::none().with_cancel(&token),
    );
    assert!(matches!(result, Err(PgpkitError::Cancelled)));
    assert!(out.is_empty());
}
