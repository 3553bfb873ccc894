//! # pgpkit - OpenPGP key management and message operations
//!
//! An OpenPGP (RFC 4880) engine in Rust: it generates and stores key rings,
//! encrypts, decrypts, signs and verifies messages, and exchanges keys with
//! HKP key servers.
//!
//! ## Features
//!
//! - **Key rings**: RSA, DSA and ElGamal keys with user IDs, subkeys, expiry,
//!   revocation and certification by other keys
//! - **Messages**: public-key and passphrase encryption with integrity
//!   protection, compression, and one-pass signatures
//! - **Signatures**: detached, cleartext and inline, in binary or text mode
//! - **Storage**: pluggable key stores with a passphrase cache that forgets
//!   idle entries
//!
//! ## Examples
//!
//! ### Passphrase Encryption
//!
//! ```rust,no_run
//! use pgpkit::crypto::Passphrase;
//! use pgpkit::ops::{self, DecryptOptions, EncryptOptions, Progress};
//! use pgpkit::{Context, EngineConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = Context::in_memory(EngineConfig::default());
//! let options = EncryptOptions {
//!     armor: true,
//!     symmetric_passphrase: Some(Passphrase::new("correct horse")),
//!     ..EncryptOptions::default()
//! };
//! let mut message = Vec::new();
//! ops::encrypt(&ctx, &mut &b"hello"[..], &mut message, &options, &Progress::none())?;
//!
//! let mut plain = Vec::new();
//! let options = DecryptOptions {
//!     passphrase: Some(Passphrase::new("correct horse")),
//!     ..DecryptOptions::default()
//! };
//! ops::decrypt(&ctx, &mut &message[..], &mut plain, &options, &Progress::none())?;
//! assert_eq!(plain, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod armor;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod keyring;
pub mod keyserver;
pub mod ops;
pub mod packet;
pub mod store;
pub mod validation;

pub use config::EngineConfig;
pub use context::Context;
pub use error::{PgpkitError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
