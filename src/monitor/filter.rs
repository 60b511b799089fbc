//! Admission Filter & Priority Classes
//!
//! Every change notification passes through here before it may enter
//! the scan queue. Rejection is cheap and happens on the notification
//! thread; priority assignment decides how soon a worker picks the
//! file up.

use std::path::Path;

/// Case-insensitive substrings that mark churn directories never worth
/// real-time scanning.
const FORBIDDEN_SUBSTRINGS: [&str; 6] = [
    r"\temp\",
    r"\tmp\",
    r"\appdata\local\temp\",
    r"\windows\winsxs\",
    r"\windows\servicing\",
    r"\system volume information\",
];

/// Extensions that never enter the queue.
const SKIP_EXTENSIONS: [&str; 9] = [
    "log", "tmp", "temp", "swp", "bak", "txt", "ini", "xml", "json",
];

/// True when the path must be rejected before enqueue.
pub fn should_skip(path: &Path) -> bool {
    // Normalize separators so the substring checks behave the same on
    // every platform's notification paths.
    let lowered = path.to_string_lossy().to_lowercase().replace('/', r"\");
    if FORBIDDEN_SUBSTRINGS
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        return true;
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            SKIP_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Map a file's extension to its priority class; higher pops earlier.
pub fn scan_priority(path: &Path) -> u8 {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return 1;
    };

    match ext.to_ascii_lowercase().as_str() {
        "exe" | "dll" | "scr" | "com" | "pif" => 10,
        "bat" | "cmd" | "ps1" | "vbs" | "js" => 7,
        "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" => 5,
        "zip" | "rar" | "7z" | "tar" => 3,
        _ => 1,
    }
}
