//! Scan Target Enumeration
//!
//! Expands a scan kind into the concrete list of root paths to walk.
//! The lists mirror the shipped defaults: critical system stores for
//! SYSTEM, system + temp + user folders for QUICK, every accessible
//! fixed or removable drive for FULL.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanKind {
    File,
    Folder,
    Drive,
    System,
    Quick,
    Full,
    Custom,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::File => "file",
            ScanKind::Folder => "folder",
            ScanKind::Drive => "drive",
            ScanKind::System => "system",
            ScanKind::Quick => "quick",
            ScanKind::Full => "full",
            ScanKind::Custom => "custom",
        }
    }
}

/// Critical system directories.
#[cfg(windows)]
pub fn system_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(r"C:\Windows\System32"),
        PathBuf::from(r"C:\Windows\SysWOW64"),
        PathBuf::from(r"C:\Program Files"),
        PathBuf::from(r"C:\Program Files (x86)"),
    ]
}

#[cfg(not(windows))]
pub fn system_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin"),
        PathBuf::from("/usr/lib"),
        PathBuf::from("/etc"),
    ]
}

/// System directories plus temp and the user's common drop zones.
pub fn quick_scan_paths() -> Vec<PathBuf> {
    let mut paths = system_paths();
    paths.push(std::env::temp_dir());
    for dir in [dirs::desktop_dir(), dirs::download_dir(), dirs::document_dir()] {
        if let Some(dir) = dir {
            paths.push(dir);
        }
    }
    paths
}

/// All accessible fixed and removable drive roots.
#[cfg(windows)]
pub fn available_drives() -> Vec<PathBuf> {
    (b'A'..=b'Z')
        .map(|letter| PathBuf::from(format!(r"{}:\", letter as char)))
        .filter(|root| root.exists())
        .collect()
}

#[cfg(not(windows))]
pub fn available_drives() -> Vec<PathBuf> {
    vec![PathBuf::from("/")]
}

/// Normalize a drive identifier (`C`, `C:`, `C:\`) to a walkable root.
pub fn drive_root(drive: &str) -> PathBuf {
    let trimmed = drive.trim();
    if trimmed.len() == 1 {
        PathBuf::from(format!(r"{}:\", trimmed))
    } else if trimmed.len() == 2 && trimmed.ends_with(':') {
        PathBuf::from(format!(r"{}\", trimmed))
    } else {
        PathBuf::from(trimmed)
    }
}

/// Default exclusion prefixes: paths that are pathological to scan.
#[cfg(windows)]
pub fn default_exclusions() -> Vec<String> {
    vec![
        r"C:\Windows\WinSxS".to_string(),
        r"C:\Windows\Servicing".to_string(),
        r"C:\System Volume Information".to_string(),
        r"C:\$Recycle.Bin".to_string(),
        r"C:\hiberfil.sys".to_string(),
        r"C:\pagefile.sys".to_string(),
        r"C:\swapfile.sys".to_string(),
    ]
}

#[cfg(not(windows))]
pub fn default_exclusions() -> Vec<String> {
    vec![
        "/proc".to_string(),
        "/sys".to_string(),
        "/dev".to_string(),
        "/run".to_string(),
    ]
}

/// Case-insensitive prefix test against the exclusion list.
pub fn is_excluded(path: &Path, exclusions: &[String]) -> bool {
    let lowered = path.to_string_lossy().to_lowercase();
    exclusions
        .iter()
        .any(|prefix| lowered.starts_with(&prefix.to_lowercase()))
}
