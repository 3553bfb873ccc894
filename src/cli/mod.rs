//! Command-line interface for pgpkit.
//!
//! Commands for key generation and listing, import and export, encryption,
//! decryption, signing, verification and key server exchange. Every command
//! runs against the key store under the home directory.

pub mod args;
pub mod commands;
pub mod utils;

use crate::Result;

pub use args::{Args, Command, KeyserverAction, Parser};

/// Main entry point for the CLI application
pub fn run(args: Args) -> Result<()> {
    let home = utils::home_dir(args.home.as_deref())?;
    let ctx = utils::open_context(&home)?;

    match args.command {
        Command::GenerateKey {
            user_ids,
            algorithm,
            bits,
            subkey_algorithm,
            expire_days,
            no_passphrase,
        } => commands::generate_key(
            &ctx,
            &user_ids,
            algorithm,
            bits,
            subkey_algorithm,
            expire_days,
            no_passphrase,
        ),
        Command::AddSubkey {
            key_id,
            algorithm,
            bits,
        } => commands::add_subkey(&ctx, &key_id, algorithm, bits),
        Command::ListKeys { secret } => commands::list_keys(&ctx, secret),
        Command::Import { file, secret } => commands::import(&ctx, &file, secret),
        Command::Export {
            key_ids,
            output,
            secret,
            binary,
        } => commands::export(&ctx, &key_ids, output.as_deref(), secret, binary),
        Command::Encrypt {
            input,
            output,
            recipients,
            symmetric,
            sign,
            armor,
            text,
        } => commands::encrypt(
            &ctx,
            &input,
            output.as_deref(),
            &recipients,
            symmetric,
            sign.as_deref(),
            armor,
            text,
        ),
        Command::Decrypt {
            input,
            output,
            symmetric,
        } => commands::decrypt(&ctx, &input, output.as_deref(), symmetric),
        Command::Sign {
            key_id,
            input,
            output,
            mode,
            hash,
            legacy,
            text,
            armor,
        } => commands::sign(
            &ctx,
            &key_id,
            &input,
            output.as_deref(),
            mode,
            hash,
            legacy,
            text,
            armor,
        ),
        Command::Verify { input, signature } => {
            commands::verify(&ctx, &input, signature.as_deref())
        }
        Command::Passwd { key_id } => commands::passwd(&ctx, &key_id),
        Command::Certify {
            key_id,
            user_id,
            with,
        } => commands::certify(&ctx, &key_id, &user_id, &with),
        Command::Keyserver { url, action } => commands::keyserver(&ctx, url.as_deref(), &action),
    }
}
