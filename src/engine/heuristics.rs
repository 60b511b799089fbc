//! Heuristic Rules
//!
//! Lightweight behavioral checks that run only when signature matching
//! found nothing and heuristics are enabled. Evaluation order is fixed
//! and the first firing rule wins. A heuristic that cannot be computed
//! is treated as non-firing; this layer never raises.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extensions treated as executable for the tiny-executable check.
const EXECUTABLE_EXTENSIONS: [&str; 4] = ["exe", "dll", "scr", "com"];

/// Size below which an executable is suspicious.
const TINY_EXECUTABLE_MAX: usize = 1024;

/// Shannon entropy above which content is considered packed/encrypted.
/// The comparison is strict.
const HIGH_ENTROPY_THRESHOLD: f64 = 7.5;

/// Strings whose presence (case-insensitive) flags a file.
const SUSPICIOUS_STRINGS: [&str; 9] = [
    "cryptolocker",
    "ransomware",
    "bitcoin",
    "your files have been encrypted",
    "pay the ransom",
    "keylogger",
    "password stealer",
    "backdoor",
    "trojan",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeuristicKind {
    TinyExecutable,
    HighEntropy,
    SuspiciousString,
}

/// A named behavioral check with a fixed severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicRule {
    pub name: String,
    pub kind: HeuristicKind,
    pub severity: u8,
}

/// The built-in rule set in evaluation order.
pub fn default_rules() -> Vec<HeuristicRule> {
    vec![
        HeuristicRule {
            name: "Heuristic.Suspicious.TinyExecutable".to_string(),
            kind: HeuristicKind::TinyExecutable,
            severity: 6,
        },
        HeuristicRule {
            name: "Heuristic.Suspicious.HighEntropy".to_string(),
            kind: HeuristicKind::HighEntropy,
            severity: 7,
        },
        HeuristicRule {
            name: "Heuristic.Suspicious.Strings".to_string(),
            kind: HeuristicKind::SuspiciousString,
            severity: 5,
        },
    ]
}

/// Evaluate the rules against a file's content. Returns the first
/// firing rule.
pub fn evaluate<'a>(
    rules: &'a [HeuristicRule],
    path: &Path,
    data: &[u8],
) -> Option<&'a HeuristicRule> {
    rules.iter().find(|rule| fires(rule.kind, path, data))
}

fn fires(kind: HeuristicKind, path: &Path, data: &[u8]) -> bool {
    match kind {
        HeuristicKind::TinyExecutable => is_tiny_executable(path, data),
        HeuristicKind::HighEntropy => shannon_entropy(data) > HIGH_ENTROPY_THRESHOLD,
        HeuristicKind::SuspiciousString => contains_suspicious_string(data),
    }
}

fn is_tiny_executable(path: &Path, data: &[u8]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    EXECUTABLE_EXTENSIONS.contains(&ext.as_str()) && data.len() < TINY_EXECUTABLE_MAX
}

/// Shannon entropy over the byte distribution, in bits per byte.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }

    let len = data.len() as f64;
    counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn contains_suspicious_string(data: &[u8]) -> bool {
    let lowered: Vec<u8> = data.iter().map(|b| b.to_ascii_lowercase()).collect();
    SUSPICIOUS_STRINGS.iter().any(|needle| {
        let needle = needle.as_bytes();
        lowered.windows(needle.len()).any(|w| w == needle)
    })
}
