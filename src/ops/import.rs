//! Key ring import and export.

use std::io::{BufRead, BufReader, Read, Write};
use tracing::{debug, info, warn};

use super::progress::{Progress, Step};
use crate::armor::{encode_with_headers, ArmorReader, ArmorWriter};
use crate::context::Context;
use crate::error::{PgpkitError, Result};
use crate::keyring::{KeyRingKind, KeyRingReader, PublicKeyRing, SecretKeyRing};
use crate::keyserver::KeyServer;
use crate::packet::stream::{FinishWrite, Sink};
use crate::packet::RawPacket;
use crate::store::{KeyStoreExt, SaveOutcome};

/// Per-ring results of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rejected: usize,
}

impl ImportOutcome {
    fn record(&mut self, outcome: SaveOutcome) {
        match outcome {
            SaveOutcome::Created => self.added += 1,
            SaveOutcome::Updated => self.updated += 1,
            SaveOutcome::Unchanged => self.unchanged += 1,
            SaveOutcome::Rejected => self.rejected += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.added + self.updated + self.unchanged + self.rejected
    }
}

/// Imports every ring of kind `target` found in `input`.
///
/// The input is either binary packets or any number of armored blocks.
/// Rings of the other kind are ignored. A ring that fails to decode is
/// counted as rejected; malformed data after the last good ring ends the
/// import without an error.
pub fn import_key_rings(
    ctx: &Context,
    input: &mut dyn Read,
    target: KeyRingKind,
    progress: &Progress<'_>,
) -> Result<ImportOutcome> {
    ctx.store.ensure_ready()?;
    progress.report(Step::Importing, 0);
    let mut buffered = BufReader::new(input);
    let first = buffered
        .fill_buf()?
        .iter()
        .copied()
        .find(|b| !b.is_ascii_whitespace());

    let mut outcome = ImportOutcome::default();
    match first {
        None => {}
        Some(byte) if byte & 0x80 != 0 => import_packets(ctx, &mut buffered, target, &mut outcome, progress)?,
        Some(_) => loop {
            let mut block = match ArmorReader::open(&mut buffered) {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Stopping import at malformed armor");
                    break;
                }
            };
            let mut data = Vec::new();
            if let Err(e) = block.read_to_end(&mut data) {
                warn!(error = %e, "Stopping import at malformed armor");
                break;
            }
            debug!(armor = ?block.armor_type(), bytes = data.len(), "Read armored block");
            import_packets(ctx, &mut &data[..], target, &mut outcome, progress)?;
        },
    }

    progress.report(Step::Done, 100);
    info!(
        kind = %target,
        added = outcome.added,
        updated = outcome.updated,
        unchanged = outcome.unchanged,
        rejected = outcome.rejected,
        "Imported key rings"
    );
    Ok(outcome)
}

fn import_packets(
    ctx: &Context,
    input: &mut dyn Read,
    target: KeyRingKind,
    outcome: &mut ImportOutcome,
    progress: &Progress<'_>,
) -> Result<()> {
    let mut reader = KeyRingReader::new(input);
    loop {
        progress.check()?;
        let (kind, packets) = match reader.next_ring() {
            Ok(Some(ring)) => ring,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "Stopping import at malformed packet data");
                return Ok(());
            }
        };
        if kind != target {
            debug!(kind = %kind, "Ignoring key ring of other kind");
            continue;
        }
        let saved = match kind {
            KeyRingKind::Public => import_public(ctx, &packets)?,
            KeyRingKind::Secret => import_secret(ctx, &packets)?,
        };
        outcome.record(saved);
    }
}

fn import_public(ctx: &Context, packets: &[RawPacket]) -> Result<SaveOutcome> {
    match PublicKeyRing::from_packets(packets) {
        Ok(ring) => ctx.store.save_public_ring(&ring),
        Err(e) => {
            debug!(error = %e, "Rejecting undecodable public key ring");
            Ok(SaveOutcome::Rejected)
        }
    }
}

/// Saves a secret ring and merges its public half, which is not counted
fn import_secret(ctx: &Context, packets: &[RawPacket]) -> Result<SaveOutcome> {
    let ring = match SecretKeyRing::from_packets(packets) {
        Ok(ring) => ring,
        Err(e) => {
            debug!(error = %e, "Rejecting undecodable secret key ring");
            return Ok(SaveOutcome::Rejected);
        }
    };
    let saved = ctx.store.save_secret_ring(&ring)?;
    if saved != SaveOutcome::Rejected {
        ctx.store.save_public_ring(&ring.to_public())?;
    }
    Ok(saved)
}

/// Writes the stored rings containing `key_ids` (all rings of `kind` when
/// empty) to `output`. Unknown IDs are skipped. Returns the number of rings
/// written.
pub fn export_key_rings(
    ctx: &Context,
    key_ids: &[u64],
    kind: KeyRingKind,
    armored: bool,
    output: &mut dyn Write,
) -> Result<usize> {
    ctx.store.ensure_ready()?;
    let masters = if key_ids.is_empty() {
        ctx.store.master_key_ids(kind)?
    } else {
        key_ids.to_vec()
    };

    let mut data = Vec::new();
    let mut count = 0;
    for id in masters {
        match ctx.store.key_ring_data_by_key_id(kind, id)? {
            Some(ring) => {
                data.extend_from_slice(&ring);
                count += 1;
            }
            None => warn!(key_id = format!("{:016X}", id), kind = %kind, "Skipping unknown key"),
        }
    }

    if armored {
        let mut writer = ArmorWriter::new(
            Sink::boxed(output),
            &kind.armor_type(),
            ctx.config.armor_version(),
        )?;
        writer.write_all(&data)?;
        Box::new(writer).finish()?;
    } else {
        output.write_all(&data)?;
    }
    info!(kind = %kind, count, armored, "Exported key rings");
    Ok(count)
}

/// Fetches `key_id` from the key server and imports it as a public ring
pub fn fetch_from_keyserver(
    ctx: &Context,
    server: &dyn KeyServer,
    key_id: u64,
    progress: &Progress<'_>,
) -> Result<ImportOutcome> {
    let armored = server.get(key_id)?;
    import_key_rings(ctx, &mut armored.as_bytes(), KeyRingKind::Public, progress)
}

/// Publishes the public ring containing `key_id`
pub fn upload_to_keyserver(ctx: &Context, server: &dyn KeyServer, key_id: u64) -> Result<bool> {
    ctx.store.ensure_ready()?;
    let ring = match ctx.store.public_ring(key_id)? {
        Some(ring) => ring,
        None => ctx
            .store
            .secret_ring(key_id)?
            .map(|ring| ring.to_public())
            .ok_or_else(|| PgpkitError::invalid_input(format!("no key {:016X} in store", key_id)))?,
    };
    let headers: Vec<(String, String)> = ctx
        .config
        .armor_version()
        .map(|version| vec![("Version".to_string(), version.to_string())])
        .unwrap_or_default();
    let armored = encode_with_headers(&ring.to_bytes(), KeyRingKind::Public.armor_type(), &headers)?;
    let accepted = server.add(&armored);
    info!(key_id = format!("{:016X}", ring.master_key_id()), accepted, "Sent key to key server");
    Ok(accepted)
}
