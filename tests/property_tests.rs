//! Property-based tests using randomized inputs
//!
//! These tests check that round-trip and rejection properties hold across
//! many generated inputs rather than a handful of fixed cases.

use pgpkit::{
    armor::{self, ArmorType},
    cache::PassphraseCache,
    crypto::{Passphrase, ProtectionParams},
    keyring::PublicKeyRing,
    ops::{self, DecryptOptions, EncryptOptions, Progress},
    packet::{encode_length, read_packet, BodyLength, PacketHeader},
    store::MemoryKeyStore,
    validation::{Validator, MAX_KEY_BITS, MIN_KEY_BITS},
    Context, EngineConfig, PgpkitError,
};
use rand::{rngs::OsRng, Rng};
use std::time::{Duration, Instant};

fn test_context() -> Context {
    Context::in_memory(EngineConfig {
        protection: ProtectionParams {
            count: 0x10,
            ..ProtectionParams::default()
        },
        // Small chunks so even short messages span several reads
        chunk_size: 97,
        ..EngineConfig::default()
    })
}

/// Property: passphrase encryption decrypts to the original for any payload
#[test]
fn property_symmetric_roundtrip() {
    let mut rng = OsRng;
    let ctx = test_context();

    for round in 0..12 {
        let size = match round {
            0 => 0,
            1 => 1,
            _ => rng.gen_range(2..5000),
        };
        let mut message = vec![0u8; size];
        rng.fill(&mut message[..]);
        let passphrase = format!("pass-{}", rng.gen::<u32>());

        let options = EncryptOptions {
            armor: rng.gen(),
            symmetric_passphrase: Some(Passphrase::from(passphrase.as_str())),
            ..EncryptOptions::default()
        };
        let mut encrypted = Vec::new();
        ops::encrypt(&ctx, &mut &message[..], &mut encrypted, &options, &Progress::none())
            .expect("Encryption failed");

        let mut decrypted = Vec::new();
        let decrypt_options = DecryptOptions {
            passphrase: Some(Passphrase::from(passphrase.as_str())),
            assume_symmetric: true,
            ..DecryptOptions::default()
        };
        ops::decrypt(
            &ctx,
            &mut &encrypted[..],
            &mut decrypted,
            &decrypt_options,
            &Progress::none(),
        )
        .expect("Decryption failed");
        assert_eq!(
            message, decrypted,
            "Roundtrip property violated for {} bytes",
            size
        );
    }
}

/// Property: a different passphrase never yields plaintext
#[test]
fn property_wrong_passphrase_never_returns_plaintext() {
    let ctx = test_context();
    let message = b"the plaintext that must stay hidden".to_vec();
    let options = EncryptOptions {
        symmetric_passphrase: Some(Passphrase::from("right")),
        ..EncryptOptions::default()
    };
    let mut encrypted = Vec::new();
    ops::encrypt(&ctx, &mut &message[..], &mut encrypted, &options, &Progress::none()).unwrap();

    for attempt in 0..10 {
        ctx.cache.clear();
        let mut decrypted = Vec::new();
        let result = ops::decrypt(
            &ctx,
            &mut &encrypted[..],
            &mut decrypted,
            &DecryptOptions {
                passphrase: Some(Passphrase::from(format!("wrong-{}", attempt))),
                ..DecryptOptions::default()
            },
            &Progress::none(),
        );
        match result {
            Err(_) => {}
            // A 16-bit quick check can collide; the payload must then fail integrity
            Ok(outcome) => assert_ne!(outcome.integrity, ops::IntegrityStatus::Verified),
        }
        assert_ne!(decrypted, message);
    }
}

/// Property: armor encoding is reversible for arbitrary binary data
#[test]
fn property_armor_roundtrip() {
    let mut rng = OsRng;
    for _ in 0..50 {
        let size = rng.gen_range(0..3000);
        let mut data = vec![0u8; size];
        rng.fill(&mut data[..]);

        let armored = armor::encode(&data, ArmorType::Message).unwrap();
        assert!(armored.lines().all(|line| line.len() <= 76));
        let decoded = armor::decode(&armored).unwrap();
        assert_eq!(decoded.armor_type, ArmorType::Message);
        assert_eq!(decoded.data, data);
    }
}

/// Property: any single corrupted base64 character is detected
#[test]
fn property_armor_checksum_detects_corruption() {
    let mut rng = OsRng;
    let mut data = vec![0u8; 600];
    rng.fill(&mut data[..]);
    let armored = armor::encode(&data, ArmorType::Message).unwrap();
    let body_lines: Vec<usize> = armored
        .lines()
        .enumerate()
        .filter(|(_, line)| line.len() == 64)
        .map(|(index, _)| index)
        .collect();

    for _ in 0..50 {
        let target = body_lines[rng.gen_range(0..body_lines.len())];
        let column = rng.gen_range(0..64);
        let mut lines: Vec<String> = armored.lines().map(str::to_string).collect();
        let original = lines[target].as_bytes()[column];
        let replacement = if original == b'A' { b'B' } else { b'A' };
        let mut bytes = lines[target].clone().into_bytes();
        bytes[column] = replacement;
        lines[target] = String::from_utf8(bytes).unwrap();

        let corrupted = lines.join("\n");
        assert!(
            armor::decode(&corrupted).is_err(),
            "Corruption at line {} column {} went unnoticed",
            target,
            column
        );
    }
}

/// Property: packet length encoding is read back exactly
#[test]
fn property_length_encoding() {
    let mut rng = OsRng;
    let mut lengths = vec![0, 191, 192, 8383, 8384, 65535, 1 << 20];
    lengths.extend((0..100).map(|_| rng.gen_range(0..10_000_000)));

    for len in lengths {
        let mut header = vec![0xC0 | 11];
        encode_length(len, &mut header);
        let parsed = PacketHeader::read(&mut &header[..])
            .unwrap()
            .expect("header present");
        assert_eq!(parsed.tag, 11);
        assert_eq!(parsed.length, BodyLength::Fixed(len as u32));
    }
}

/// Property: invalid inputs are rejected without panicking
#[test]
fn property_invalid_input_rejection() {
    let mut rng = OsRng;

    for _ in 0..200 {
        let size = rng.gen_range(0..2000);
        let mut random_data = vec![0u8; size];
        rng.fill(&mut random_data[..]);

        let result = std::panic::catch_unwind(|| {
            let _ = read_packet(&mut &random_data[..]);
            let _ = PublicKeyRing::from_bytes(&random_data);
            let _ = armor::decode(&String::from_utf8_lossy(&random_data));

            let ctx = test_context();
            let mut sink = Vec::new();
            let _ = ops::decrypt(
                &ctx,
                &mut &random_data[..],
                &mut sink,
                &DecryptOptions::default(),
                &Progress::none(),
            );
        });
        assert!(
            result.is_ok(),
            "Parsing panicked on {} random bytes",
            random_data.len()
        );
    }
}

/// Property: key strength is accepted exactly within the supported range
#[test]
fn property_key_bits_bounds() {
    let mut rng = OsRng;
    let mut samples = vec![0, MIN_KEY_BITS - 1, MIN_KEY_BITS, MAX_KEY_BITS, MAX_KEY_BITS + 1];
    samples.extend((0..100).map(|_| rng.gen_range(0..20_000)));

    for bits in samples {
        let result = Validator::validate_key_bits(bits);
        if (MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
            assert!(result.is_ok(), "Valid key size {} rejected", bits);
        } else if bits < MIN_KEY_BITS {
            assert!(matches!(result, Err(PgpkitError::KeySizeTooSmall { .. })));
        } else {
            assert!(result.is_err(), "Oversized key {} accepted", bits);
        }
    }
}

/// Property: sweeping never drops an entry younger than the TTL
#[test]
fn property_cache_sweep_respects_ttl() {
    let mut rng = OsRng;
    let store = MemoryKeyStore::new();
    let cache = PassphraseCache::new();
    let start = Instant::now();
    let ttl = Duration::from_secs(300);

    let mut ages = Vec::new();
    for id in 0..50u64 {
        let age = rng.gen_range(0..600);
        cache.set_at(id, Passphrase::from("p"), start + Duration::from_secs(600 - age));
        ages.push(age);
    }

    let next = cache.sweep_at(ttl, Duration::from_secs(60), start + Duration::from_secs(600));
    assert!(next <= Duration::from_secs(60));
    for (id, age) in ages.into_iter().enumerate() {
        let present = cache
            .get_at(id as u64, &store, start + Duration::from_secs(600))
            .is_some();
        assert_eq!(present, age < 300, "entry aged {}s", age);
    }
}
