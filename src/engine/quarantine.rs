//! Quarantine Store
//!
//! Durable, reversible isolation. Payloads are moved under the
//! quarantine root as `<unix-epoch-seconds>_<basename>` and tracked in
//! a binary metadata journal (`metadata.dat`) that is replayed on
//! startup. Orphaned payloads with no journal entry are collected at
//! startup; the moved file is always observed on disk before the
//! journal records it.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

const JOURNAL_FILE: &str = "metadata.dat";

/// Record of one isolated file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub id: String,
    pub original_path: PathBuf,
    pub quarantine_path: PathBuf,
    pub threat_name: String,
    /// Unix epoch seconds at admission.
    pub quarantined_at: i64,
    pub original_size: u64,
    pub sha256: String,
}

/// Owns the quarantine root, its payloads, and the metadata journal.
pub struct QuarantineStore {
    root: PathBuf,
    entries: HashMap<String, QuarantineEntry>,
}

impl QuarantineStore {
    /// Open (creating if needed) the store at `root`, replay the
    /// journal, and collect orphaned payloads.
    pub fn open(root: &Path) -> EngineResult<Self> {
        fs::create_dir_all(root).map_err(|e| EngineError::io_quarantine(root, e))?;
        restrict_permissions(root);

        let mut store = Self {
            root: root.to_path_buf(),
            entries: HashMap::new(),
        };
        store.replay_journal();
        store.collect_orphans();
        Ok(store)
    }

    /// Move `source` into the quarantine root. On success the entry is
    /// journaled and the original path no longer exists.
    pub fn admit(&mut self, source: &Path, threat_name: &str) -> EngineResult<QuarantineEntry> {
        let metadata = fs::metadata(source)
            .map_err(|_| EngineError::NotFound(source.display().to_string()))?;
        let original_size = metadata.len();
        let sha256 = hash_file(source).map_err(|e| EngineError::unreadable(source, e))?;

        let timestamp = Utc::now().timestamp();
        let basename = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let quarantine_path = self.root.join(format!("{}_{}", timestamp, basename));

        // Move, falling back to copy + unlink across volumes.
        fs::rename(source, &quarantine_path)
            .or_else(|_| {
                fs::copy(source, &quarantine_path)
                    .and_then(|_| fs::remove_file(source))
            })
            .map_err(|e| EngineError::io_quarantine(source, e))?;

        let entry = QuarantineEntry {
            id: Uuid::new_v4().to_string(),
            original_path: source.to_path_buf(),
            quarantine_path,
            threat_name: threat_name.to_string(),
            quarantined_at: timestamp,
            original_size,
            sha256,
        };

        // Payload is on disk first; only then does the journal see it.
        self.entries.insert(entry.id.clone(), entry.clone());
        self.write_journal()?;

        log::warn!(
            "quarantined {} -> {} ({})",
            entry.original_path.display(),
            entry.quarantine_path.display(),
            threat_name
        );

        Ok(entry)
    }

    /// Move a payload back out of the quarantine root.
    pub fn restore(&mut self, id: &str, destination: &Path) -> EngineResult<()> {
        let entry = self
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("quarantine entry {}", id)))?;

        if !entry.quarantine_path.exists() {
            return Err(EngineError::NotFound(
                entry.quarantine_path.display().to_string(),
            ));
        }

        match hash_file(&entry.quarantine_path) {
            Ok(hash) if hash != entry.sha256 => {
                log::warn!(
                    "quarantined payload {} no longer matches its admission hash",
                    entry.quarantine_path.display()
                );
            }
            _ => {}
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io_quarantine(destination, e))?;
        }
        fs::rename(&entry.quarantine_path, destination)
            .or_else(|_| {
                fs::copy(&entry.quarantine_path, destination)
                    .and_then(|_| fs::remove_file(&entry.quarantine_path))
            })
            .map_err(|e| EngineError::io_quarantine(destination, e))?;

        self.entries.remove(id);
        self.write_journal()?;

        log::info!(
            "restored {} -> {}",
            entry.quarantine_path.display(),
            destination.display()
        );
        Ok(())
    }

    /// Delete a payload permanently and drop its entry.
    pub fn purge(&mut self, id: &str) -> EngineResult<()> {
        let entry = self
            .entries
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(format!("quarantine entry {}", id)))?;

        if entry.quarantine_path.exists() {
            fs::remove_file(&entry.quarantine_path)
                .map_err(|e| EngineError::io_quarantine(&entry.quarantine_path, e))?;
        }
        self.write_journal()?;

        log::info!("purged quarantined payload {}", entry.quarantine_path.display());
        Ok(())
    }

    /// Immutable snapshot of the current entries.
    pub fn enumerate(&self) -> Vec<QuarantineEntry> {
        let mut list: Vec<QuarantineEntry> = self.entries.values().cloned().collect();
        list.sort_by_key(|e| e.quarantined_at);
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ------------------------------------------------------------------
    // Journal
    // ------------------------------------------------------------------

    fn journal_path(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }

    /// Rebuild the in-memory index from the journal. Ids are
    /// regenerated and sizes restated from the payloads on disk;
    /// entries whose payload vanished are dropped.
    fn replay_journal(&mut self) {
        let path = self.journal_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(_) => return,
        };

        let records = match parse_journal(&data) {
            Ok(records) => records,
            Err(err) => {
                log::error!("quarantine journal unreadable, starting empty: {}", err);
                return;
            }
        };

        for record in records {
            if !record.quarantine_path.exists() {
                log::warn!(
                    "journal references missing payload {}, dropping entry",
                    record.quarantine_path.display()
                );
                continue;
            }
            let original_size = fs::metadata(&record.quarantine_path)
                .map(|m| m.len())
                .unwrap_or(0);
            let sha256 = hash_file(&record.quarantine_path).unwrap_or_default();
            let entry = QuarantineEntry {
                id: Uuid::new_v4().to_string(),
                original_path: record.original_path,
                quarantine_path: record.quarantine_path,
                threat_name: record.threat_name,
                quarantined_at: record.quarantined_at,
                original_size,
                sha256,
            };
            self.entries.insert(entry.id.clone(), entry);
        }

        log::info!("quarantine journal replayed: {} entries", self.entries.len());
    }

    /// Remove payload files under the root that no journal entry
    /// references (a crash between the move and the journal write
    /// leaves exactly this state behind).
    fn collect_orphans(&self) {
        let referenced: Vec<&PathBuf> =
            self.entries.values().map(|e| &e.quarantine_path).collect();

        let Ok(dir) = fs::read_dir(&self.root) else {
            return;
        };
        for item in dir.flatten() {
            let path = item.path();
            if !path.is_file() || path.file_name().is_some_and(|n| n == JOURNAL_FILE) {
                continue;
            }
            if !referenced.iter().any(|p| **p == path) {
                log::warn!("collecting orphaned quarantine payload {}", path.display());
                let _ = fs::remove_file(&path);
            }
        }
    }

    /// Persist the journal: full rewrite to a temp file, fsync, rename.
    fn write_journal(&self) -> EngineResult<()> {
        let entries = self.enumerate();
        let mut out = Vec::with_capacity(64 + entries.len() * 256);
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());

        for entry in &entries {
            write_utf16(&mut out, &entry.original_path.to_string_lossy());
            write_utf16(&mut out, &entry.quarantine_path.to_string_lossy());
            write_utf16(&mut out, &entry.threat_name);
            out.extend_from_slice(&(entry.quarantined_at as u64).to_le_bytes());
        }

        let path = self.journal_path();
        let tmp = path.with_extension("dat.tmp");
        {
            use std::io::Write;
            let mut file = File::create(&tmp).map_err(|e| EngineError::io_quarantine(&tmp, e))?;
            file.write_all(&out)
                .map_err(|e| EngineError::io_quarantine(&tmp, e))?;
            file.sync_all().map_err(|e| EngineError::io_quarantine(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| EngineError::io_quarantine(&path, e))?;
        Ok(())
    }
}

// ============================================================================
// JOURNAL WIRE FORMAT
// ============================================================================

struct JournalRecord {
    original_path: PathBuf,
    quarantine_path: PathBuf,
    threat_name: String,
    quarantined_at: i64,
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> EngineResult<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| EngineError::MalformedDb("journal truncated".into()))?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_u32(data: &[u8], pos: &mut usize) -> EngineResult<u32> {
    let b = take(data, pos, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_utf16_string(data: &[u8], pos: &mut usize) -> EngineResult<String> {
    let code_units = read_u32(data, pos)? as usize;
    let raw = take(data, pos, code_units * 2)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| EngineError::MalformedDb("journal string is not valid UTF-16".into()))
}

fn parse_journal(data: &[u8]) -> EngineResult<Vec<JournalRecord>> {
    let mut pos = 0usize;

    let count = read_u32(data, &mut pos)?;
    let mut records = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let original_path = PathBuf::from(read_utf16_string(data, &mut pos)?);
        let quarantine_path = PathBuf::from(read_utf16_string(data, &mut pos)?);
        let threat_name = read_utf16_string(data, &mut pos)?;
        let raw_ts = take(data, &mut pos, 8)?;
        let quarantined_at = u64::from_le_bytes([
            raw_ts[0], raw_ts[1], raw_ts[2], raw_ts[3], raw_ts[4], raw_ts[5], raw_ts[6],
            raw_ts[7],
        ]) as i64;
        records.push(JournalRecord {
            original_path,
            quarantine_path,
            threat_name,
            quarantined_at,
        });
    }
    Ok(records)
}

fn write_utf16(out: &mut Vec<u8>, text: &str) {
    let units: Vec<u16> = text.encode_utf16().collect();
    out.extend_from_slice(&(units.len() as u32).to_le_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(unix)]
fn restrict_permissions(root: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(root, fs::Permissions::from_mode(0o700)) {
        log::warn!(
            "could not restrict quarantine root permissions on {}: {}",
            root.display(),
            err
        );
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_root: &Path) {
    // The root is created under the service's protected data directory;
    // tightening the ACL further is handled by the installer.
}
