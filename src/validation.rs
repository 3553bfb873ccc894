//! Input validation and resource limits for pgpkit.
//!
//! Packets that are parsed into memory (keys, signatures, session keys, user
//! IDs) are bounded here so that hostile input cannot force unbounded
//! allocation. Streamed packets (literal, compressed, encrypted data) are never
//! buffered and are not subject to the packet size limit.

use crate::error::{PgpkitError, Result};

/// Maximum size of a packet that is buffered in memory (16MB)
///
/// Large enough for keys carrying photo IDs, small enough to stop hostile
/// length fields from allocating unbounded memory.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Maximum allowed User ID length (4KB)
pub const MAX_USER_ID_LENGTH: usize = 4 * 1024;

/// Maximum allowed MPI size in bits
pub const MAX_MPI_BITS: usize = 16 * 1024;

/// Minimum key strength accepted for generation
pub const MIN_KEY_BITS: usize = 512;

/// Maximum key strength accepted for generation
pub const MAX_KEY_BITS: usize = 8192;

/// Maximum number of keys (master plus subkeys) in one key ring
pub const MAX_KEYS_PER_KEYRING: usize = 256;

/// Maximum nesting depth for compressed/signed packet containers
pub const MAX_PACKET_NESTING_DEPTH: usize = 8;

/// Validation functions for input data
pub struct Validator;

impl Validator {
    /// Validate the body size of a packet that will be buffered
    pub fn validate_packet_size(size: usize) -> Result<()> {
        if size > MAX_PACKET_SIZE {
            return Err(PgpkitError::validation(format!(
                "Packet too large: {} bytes exceeds maximum of {} bytes",
                size, MAX_PACKET_SIZE
            )));
        }
        Ok(())
    }

    /// Validate a User ID string.
    ///
    /// Empty user IDs are allowed: freshly generated master keys are certified
    /// over an empty placeholder until real identities are attached.
    pub fn validate_user_id(user_id: &str) -> Result<()> {
        if user_id.len() > MAX_USER_ID_LENGTH {
            return Err(PgpkitError::validation(format!(
                "User ID too long: {} bytes exceeds maximum of {} bytes",
                user_id.len(),
                MAX_USER_ID_LENGTH
            )));
        }

        if user_id.contains('\0') {
            return Err(PgpkitError::validation("User ID contains null bytes"));
        }

        if user_id
            .chars()
            .any(|c| c.is_control() && c != '\t' && c != '\n' && c != '\r')
        {
            return Err(PgpkitError::validation(
                "User ID contains invalid control characters",
            ));
        }

        Ok(())
    }

    /// Validate a requested key strength for generation
    pub fn validate_key_bits(bits: usize) -> Result<()> {
        if bits < MIN_KEY_BITS {
            return Err(PgpkitError::KeySizeTooSmall { min: MIN_KEY_BITS });
        }
        if bits > MAX_KEY_BITS {
            return Err(PgpkitError::validation(format!(
                "Key size {} exceeds maximum of {} bits",
                bits, MAX_KEY_BITS
            )));
        }
        Ok(())
    }

    /// Validate the declared bit length of an MPI
    pub fn validate_mpi_bits(bits: usize) -> Result<()> {
        if bits > MAX_MPI_BITS {
            return Err(PgpkitError::validation(format!(
                "MPI too large: {} bits exceeds maximum of {} bits",
                bits, MAX_MPI_BITS
            )));
        }
        Ok(())
    }

    /// Validate container nesting depth
    pub fn validate_nesting_depth(depth: usize) -> Result<()> {
        if depth > MAX_PACKET_NESTING_DEPTH {
            return Err(PgpkitError::validation(format!(
                "Packet nesting too deep: {} exceeds maximum of {}",
                depth, MAX_PACKET_NESTING_DEPTH
            )));
        }
        Ok(())
    }

    /// Validate the number of keys in a key ring
    pub fn validate_keyring_size(count: usize) -> Result<()> {
        if count > MAX_KEYS_PER_KEYRING {
            return Err(PgpkitError::validation(format!(
                "Too many keys in key ring: {} exceeds maximum of {}",
                count, MAX_KEYS_PER_KEYRING
            )));
        }
        Ok(())
    }

    /// Validate that a length field is reasonable (not obviously malicious)
    pub fn validate_length_field(length: usize, max_reasonable: usize) -> Result<()> {
        if length > max_reasonable {
            return Err(PgpkitError::validation(format!(
                "Suspiciously large length field: {} exceeds reasonable maximum of {}",
                length, max_reasonable
            )));
        }
        Ok(())
    }
}
