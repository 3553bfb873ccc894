//! Utility functions for CLI operations.

use chrono::{TimeZone, Utc};
use rpassword::prompt_password;
use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{EngineConfig, CONFIG_FILE_NAME};
use crate::context::Context;
use crate::crypto::Passphrase;
use crate::error::{PgpkitError, Result};
use crate::store::DirectoryKeyStore;

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "PGPKIT_HOME";

/// Resolves the home directory: explicit flag, then $PGPKIT_HOME, then ~/.pgpkit
pub fn home_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let dir = match explicit {
        Some(dir) => dir.to_path_buf(),
        None => match env::var_os(HOME_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = env::var_os("HOME")
                    .ok_or_else(|| PgpkitError::config("HOME environment variable not set"))?;
                Path::new(&home).join(".pgpkit")
            }
        },
    };
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Engine context over the directory key store of `home`
pub fn open_context(home: &Path) -> Result<Context> {
    let config = EngineConfig::load_or_default(&home.join(CONFIG_FILE_NAME))?;
    let store_dir = config
        .key_store_dir
        .clone()
        .unwrap_or_else(|| home.join("keys"));
    let store = DirectoryKeyStore::open(&store_dir)?;
    Ok(Context::new(Arc::new(store), config))
}

/// Parses a hexadecimal key ID, with or without a `0x` prefix
pub fn parse_key_id(text: &str) -> Result<u64> {
    let hex = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    if hex.is_empty() || hex.len() > 16 {
        return Err(PgpkitError::invalid_input(format!("invalid key ID: {}", text)));
    }
    u64::from_str_radix(hex, 16)
        .map_err(|_| PgpkitError::invalid_input(format!("invalid key ID: {}", text)))
}

pub fn parse_key_ids(texts: &[String]) -> Result<Vec<u64>> {
    texts.iter().map(|t| parse_key_id(t)).collect()
}

/// Opens a file for reading; `-` is standard input
pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin()));
    }
    Ok(Box::new(fs::File::open(path)?))
}

/// Size of an input file, for progress reporting
pub fn input_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

/// Creates the output file, or standard output when none is given
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) if path != Path::new("-") => Ok(Box::new(io::BufWriter::new(fs::File::create(path)?))),
        _ => Ok(Box::new(io::stdout())),
    }
}

pub fn format_key_id(key_id: u64) -> String {
    format!("{:016X}", key_id)
}

pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .chunks(2)
        .map(|pair| pair.iter().map(|b| format!("{:02X}", b)).collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats an OpenPGP timestamp as a UTC date
pub fn format_timestamp(timestamp: u32) -> String {
    match Utc.timestamp_opt(i64::from(timestamp), 0).single() {
        Some(time) => time.format("%Y-%m-%d").to_string(),
        None => timestamp.to_string(),
    }
}

/// Prompts for a passphrase without echo
pub fn prompt_passphrase(prompt: &str) -> Result<Passphrase> {
    let passphrase = prompt_password(format!("{}: ", prompt))
        .map_err(|e| PgpkitError::invalid_input(format!("Failed to read passphrase: {}", e)))?;
    Ok(Passphrase::new(passphrase))
}

/// Prompts twice for a new passphrase and checks both entries match
pub fn prompt_new_passphrase(prompt: &str) -> Result<Passphrase> {
    let first = prompt_passphrase(prompt)?;
    let second = prompt_passphrase("Repeat passphrase")?;
    if first != second {
        return Err(PgpkitError::invalid_input("Passphrases do not match"));
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_id() {
        assert_eq!(parse_key_id("0xDEADBEEF").unwrap(), 0xDEADBEEF);
        assert_eq!(parse_key_id("0123456789abcdef").unwrap(), 0x0123456789ABCDEF);
        assert!(parse_key_id("").is_err());
        assert!(parse_key_id("xyz").is_err());
        assert!(parse_key_id("0123456789ABCDEF0").is_err());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_key_id(0xABC), "0000000000000ABC");
        assert_eq!(format_fingerprint(&[0x12, 0x34, 0x56]), "1234 56");
        assert_eq!(format_timestamp(0), "1970-01-01");
    }

    #[test]
    fn test_open_context_creates_store() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = open_context(dir.path()).unwrap();
        assert!(ctx.store.is_ready());
        assert!(dir.path().join("keys").exists());
    }
}
