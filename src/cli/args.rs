//! Command-line argument parsing for pgpkit.

pub use clap::Parser;
use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::crypto::{HashAlgorithm, PublicKeyAlgorithm};

#[derive(Parser, Debug)]
#[command(name = "pgpkit")]
#[command(version, about = "OpenPGP key management, encryption and signing")]
pub struct Args {
    /// Home directory holding config.toml and the key store (defaults to
    /// $PGPKIT_HOME, then ~/.pgpkit)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Key algorithms offered for generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyAlgorithm {
    Rsa,
    Dsa,
    Elgamal,
}

impl From<KeyAlgorithm> for PublicKeyAlgorithm {
    fn from(algorithm: KeyAlgorithm) -> Self {
        match algorithm {
            KeyAlgorithm::Rsa => PublicKeyAlgorithm::Rsa,
            KeyAlgorithm::Dsa => PublicKeyAlgorithm::Dsa,
            KeyAlgorithm::Elgamal => PublicKeyAlgorithm::ElGamal,
        }
    }
}

/// Hash algorithms offered for signing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HashChoice {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Ripemd160,
}

impl From<HashChoice> for HashAlgorithm {
    fn from(hash: HashChoice) -> Self {
        match hash {
            HashChoice::Sha1 => HashAlgorithm::Sha1,
            HashChoice::Sha224 => HashAlgorithm::Sha224,
            HashChoice::Sha256 => HashAlgorithm::Sha256,
            HashChoice::Sha384 => HashAlgorithm::Sha384,
            HashChoice::Sha512 => HashAlgorithm::Sha512,
            HashChoice::Ripemd160 => HashAlgorithm::Ripemd160,
        }
    }
}

/// Flavor of signature to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SignMode {
    Detached,
    Cleartext,
    Inline,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a new key ring
    GenerateKey {
        /// User ID, e.g. "Alice <alice@example.com>"; repeat for more
        #[arg(long = "user-id", required = true)]
        user_ids: Vec<String>,
        #[arg(long, value_enum, default_value = "rsa")]
        algorithm: KeyAlgorithm,
        #[arg(long, default_value_t = 3072)]
        bits: usize,
        /// Encryption subkey algorithm; defaults to RSA for RSA masters and
        /// ElGamal for DSA masters
        #[arg(long, value_enum)]
        subkey_algorithm: Option<KeyAlgorithm>,
        /// Validity in days; 0 never expires
        #[arg(long, default_value_t = 0)]
        expire_days: u32,
        /// Store the secret key without passphrase protection
        #[arg(long)]
        no_passphrase: bool,
    },
    /// Add a subkey to an existing key ring
    AddSubkey {
        key_id: String,
        #[arg(long, value_enum)]
        algorithm: KeyAlgorithm,
        #[arg(long, default_value_t = 3072)]
        bits: usize,
    },
    /// List stored key rings
    ListKeys {
        /// List secret rings instead of public ones
        #[arg(long)]
        secret: bool,
    },
    /// Import key rings from a file (armored or binary)
    Import {
        file: PathBuf,
        /// Import secret rings instead of public ones
        #[arg(long)]
        secret: bool,
    },
    /// Export key rings; all rings when no key ID is given
    Export {
        key_ids: Vec<String>,
        #[arg(long, short)]
        output: Option<PathBuf>,
        #[arg(long)]
        secret: bool,
        /// Write binary packets instead of ASCII armor
        #[arg(long)]
        binary: bool,
    },
    /// Encrypt a file to recipients and/or a passphrase
    Encrypt {
        input: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
        #[arg(long = "recipient", short)]
        recipients: Vec<String>,
        /// Also (or only) encrypt with a passphrase
        #[arg(long)]
        symmetric: bool,
        /// Sign with this key
        #[arg(long)]
        sign: Option<String>,
        #[arg(long)]
        armor: bool,
        /// Treat the input as text
        #[arg(long)]
        text: bool,
    },
    /// Decrypt a message and check its signatures
    Decrypt {
        input: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Use the passphrase even if the message has public-key recipients
        #[arg(long)]
        symmetric: bool,
    },
    /// Sign a file
    Sign {
        key_id: String,
        input: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "detached")]
        mode: SignMode,
        #[arg(long, value_enum)]
        hash: Option<HashChoice>,
        /// Produce version 3 signatures
        #[arg(long)]
        legacy: bool,
        #[arg(long)]
        text: bool,
        #[arg(long)]
        armor: bool,
    },
    /// Verify a detached or cleartext signature
    Verify {
        /// Signed data, or the cleartext signed message when no signature is given
        input: PathBuf,
        /// Detached signature file
        signature: Option<PathBuf>,
    },
    /// Change the passphrase of a secret key ring
    Passwd { key_id: String },
    /// Certify a user ID on someone else's key
    Certify {
        /// Key to certify
        key_id: String,
        #[arg(long)]
        user_id: String,
        /// Certifying key
        #[arg(long)]
        with: String,
    },
    /// Exchange keys with an HKP key server
    Keyserver {
        /// Key server URL; defaults to the configured one
        #[arg(long)]
        url: Option<String>,
        #[command(subcommand)]
        action: KeyserverAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeyserverAction {
    /// Fetch a key and import it
    Get { key_id: String },
    /// Upload a stored public key
    Send { key_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_encrypt() {
        let args = Args::parse_from([
            "pgpkit", "encrypt", "in.txt", "-r", "0xDEADBEEF", "-r", "ABCD", "--armor",
        ]);
        match args.command {
            Command::Encrypt {
                recipients, armor, ..
            } => {
                assert_eq!(recipients, vec!["0xDEADBEEF", "ABCD"]);
                assert!(armor);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_keyserver() {
        let args = Args::parse_from(["pgpkit", "--home", "/tmp/x", "keyserver", "get", "1234"]);
        assert_eq!(args.home, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(
            args.command,
            Command::Keyserver {
                action: KeyserverAction::Get { .. },
                ..
            }
        ));
    }
}
