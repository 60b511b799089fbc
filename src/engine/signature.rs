//! Signature Store
//!
//! Loads and persists the detection ruleset and publishes immutable
//! snapshots to the matcher. The on-disk format is the binary
//! `signatures.db` layout: a 12-byte header (`SIGS`, version, count)
//! followed by length-prefixed records. Round-trips are bit-exact.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub const DB_MAGIC: &[u8; 4] = b"SIGS";
const HEADER_LEN: usize = 12;

/// Where a signature's pattern must occur in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anchor {
    /// Pattern must match at exactly this byte offset.
    Fixed(u32),
    /// Pattern may occur anywhere.
    Floating,
}

impl Anchor {
    fn to_wire(self) -> i32 {
        match self {
            Anchor::Fixed(offset) => offset as i32,
            Anchor::Floating => -1,
        }
    }

    fn from_wire(raw: i32) -> Self {
        if raw < 0 {
            Anchor::Floating
        } else {
            Anchor::Fixed(raw as u32)
        }
    }
}

/// A single named detection rule. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub pattern: Vec<u8>,
    pub severity: u8,
    pub anchor: Anchor,
}

impl Signature {
    pub fn fixed(name: &str, pattern: &[u8], offset: u32, severity: u8) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_vec(),
            severity,
            anchor: Anchor::Fixed(offset),
        }
    }

    pub fn floating(name: &str, pattern: &[u8], severity: u8) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_vec(),
            severity,
            anchor: Anchor::Floating,
        }
    }

    /// True if the pattern occurs in `data` at this signature's anchor.
    pub fn matches(&self, data: &[u8]) -> bool {
        if self.pattern.is_empty() {
            return false;
        }
        match self.anchor {
            Anchor::Fixed(offset) => {
                let start = offset as usize;
                let end = start + self.pattern.len();
                end <= data.len() && &data[start..end] == self.pattern.as_slice()
            }
            Anchor::Floating => data
                .windows(self.pattern.len())
                .any(|w| w == self.pattern.as_slice()),
        }
    }
}

/// An immutable, versioned set of signatures. Ordering is preserved
/// from the on-disk file order and is the match tie-break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSet {
    pub version: u32,
    pub signatures: Vec<Signature>,
}

impl SignatureSet {
    pub fn new(version: u32, signatures: Vec<Signature>) -> Self {
        Self { version, signatures }
    }

    /// First matching signature in set order, if any.
    pub fn match_buffer(&self, data: &[u8]) -> Option<&Signature> {
        self.signatures.iter().find(|sig| sig.matches(data))
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Owns the active snapshot and the database file path.
///
/// The snapshot is replaced atomically under a mutex; readers clone
/// the `Arc` once and keep it for the duration of a single scan, so
/// an in-flight scan never observes a half-published update.
pub struct SignatureStore {
    db_path: PathBuf,
    active: Mutex<Arc<SignatureSet>>,
}

impl SignatureStore {
    /// Open the store at `db_path`. A missing or malformed database is
    /// non-fatal: the default bootstrap set is published and written
    /// back so the engine is never inert.
    pub fn open(db_path: &Path) -> Self {
        if let Some(parent) = db_path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let set = match load_database(db_path) {
            Ok(set) => {
                log::info!(
                    "signature database loaded: {} rules, version {}",
                    set.len(),
                    set.version
                );
                set
            }
            Err(err) => {
                log::warn!(
                    "signature database unavailable ({}), bootstrapping defaults",
                    err
                );
                let set = bootstrap_set();
                if let Err(save_err) = save_database(db_path, &set) {
                    log::error!("failed to persist bootstrap database: {}", save_err);
                }
                set
            }
        };

        Self {
            db_path: db_path.to_path_buf(),
            active: Mutex::new(Arc::new(set)),
        }
    }

    /// Read-only handle used by the matcher. Valid for as long as the
    /// caller holds it, independent of later publishes.
    pub fn active_snapshot(&self) -> Arc<SignatureSet> {
        Arc::clone(&self.active.lock())
    }

    pub fn version(&self) -> u32 {
        self.active.lock().version
    }

    /// Atomically replace the active set and persist it.
    pub fn publish(&self, set: SignatureSet) -> EngineResult<()> {
        save_database(&self.db_path, &set)?;
        *self.active.lock() = Arc::new(set);
        Ok(())
    }

    /// Re-persist the current rules under an incremented version and
    /// publish the new snapshot. Returns the new version number.
    pub fn bump_version(&self) -> EngineResult<u32> {
        let current = self.active_snapshot();
        let next = SignatureSet::new(current.version + 1, current.signatures.clone());
        let version = next.version;
        self.publish(next)?;
        Ok(version)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// The seed rules created on first run, matching the shipped defaults:
/// one fixed-offset low-severity rule and two floating rules, one of
/// them high-severity.
pub fn bootstrap_set() -> SignatureSet {
    SignatureSet::new(
        1,
        vec![
            Signature::fixed("PE.Suspicious.Header", b"MZ", 0, 3),
            Signature::floating("Script.Suspicious.PowerShell", b"powershell", 5),
            Signature::floating("Ransomware.Generic.Extension", b".locked", 10),
        ],
    )
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> EngineResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                EngineError::MalformedDb(format!(
                    "record reads past end of file at offset {}",
                    self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> EngineResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> EngineResult<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

fn read_utf16(cursor: &mut Cursor<'_>, code_units: usize) -> EngineResult<String> {
    let raw = cursor.take(code_units * 2)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| EngineError::MalformedDb("signature name is not valid UTF-16".into()))
}

fn write_utf16(out: &mut Vec<u8>, text: &str) {
    let units: Vec<u16> = text.encode_utf16().collect();
    out.extend_from_slice(&(units.len() as u32).to_le_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

/// Parse a full database image. Fails with `MalformedDb` on a bad
/// magic, any out-of-bounds length, or an out-of-range severity.
pub fn parse_database(data: &[u8]) -> EngineResult<SignatureSet> {
    if data.len() < HEADER_LEN {
        return Err(EngineError::MalformedDb("file shorter than header".into()));
    }
    if &data[..4] != DB_MAGIC {
        return Err(EngineError::MalformedDb("bad magic".into()));
    }

    let mut cursor = Cursor::new(&data[4..]);
    let version = cursor.read_u32()?;
    let count = cursor.read_u32()?;

    let mut signatures = Vec::with_capacity(count.min(1024) as usize);
    for index in 0..count {
        let name_len = cursor.read_u32()? as usize;
        let name = read_utf16(&mut cursor, name_len)?;

        let severity = cursor.read_u32()?;
        if !(1..=10).contains(&severity) {
            return Err(EngineError::MalformedDb(format!(
                "record {}: severity {} outside 1..10",
                index, severity
            )));
        }

        let pattern_len = cursor.read_u32()? as usize;
        let pattern = cursor.take(pattern_len)?.to_vec();
        let anchor = Anchor::from_wire(cursor.read_i32()?);

        signatures.push(Signature {
            name,
            pattern,
            severity: severity as u8,
            anchor,
        });
    }

    Ok(SignatureSet::new(version, signatures))
}

/// Serialize a set back into the exact wire layout.
pub fn encode_database(set: &SignatureSet) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + set.len() * 64);
    out.extend_from_slice(DB_MAGIC);
    out.extend_from_slice(&set.version.to_le_bytes());
    out.extend_from_slice(&(set.signatures.len() as u32).to_le_bytes());

    for sig in &set.signatures {
        write_utf16(&mut out, &sig.name);
        out.extend_from_slice(&(sig.severity as u32).to_le_bytes());
        out.extend_from_slice(&(sig.pattern.len() as u32).to_le_bytes());
        out.extend_from_slice(&sig.pattern);
        out.extend_from_slice(&sig.anchor.to_wire().to_le_bytes());
    }

    out
}

pub fn load_database(path: &Path) -> EngineResult<SignatureSet> {
    let data = fs::read(path).map_err(|e| EngineError::unreadable(path, e))?;
    parse_database(&data)
}

/// Atomic save: write to a temp file next to the target, then rename.
pub fn save_database(path: &Path, set: &SignatureSet) -> EngineResult<()> {
    let tmp = path.with_extension("db.tmp");
    fs::write(&tmp, encode_database(set)).map_err(|e| EngineError::unreadable(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| EngineError::unreadable(path, e))?;
    Ok(())
}
