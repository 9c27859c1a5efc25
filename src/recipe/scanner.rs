// src/recipe/scanner.rs

//! Heuristic scan of recipe text for dangerous commands
//!
//! This is an aid to human review, not a security boundary: it flags lines
//! that commonly show up in malicious recipes so the reviewer looks at them.
//! Rules are applied in a fixed order to every non-comment line.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// A recipe line flagged by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DangerousCommand {
    /// 1-based line number
    pub line: usize,
    /// The trimmed line text
    pub text: String,
    /// Why the line was flagged
    pub reason: String,
}

/// How many records a line matching several rules produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanPolicy {
    /// One record per matching rule
    #[default]
    PerRule,
    /// Only the first matching rule is recorded
    PerLine,
}

struct Rule {
    pattern: Regex,
    reason: &'static str,
}

const RULES: &[(&str, &str)] = &[
    (
        r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba|z|da|k|fi)?sh\b",
        "Downloads and executes script",
    ),
    (
        r#"\brm\s+(-[a-zA-Z-]+\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(-[a-zA-Z-]+\s+)*["']?/\*?["']?(\s|;|&|$)"#,
        "Recursive deletion from root",
    ),
    (
        r"\bchmod\s+(-[a-zA-Z]+\s+)*(0?[0-7]?777\b|[ugo]*[ao][ugo]*\+[rx]*w)",
        "Sets world-writable permissions",
    ),
    (r"\beval\b", "Dynamic code evaluation"),
    (
        r"(\$\(|`)\s*(curl|wget)\b",
        "Command substitution with network fetch",
    ),
    (r"\b(sudo|doas|pkexec)\b|\bsu\s+-", "Privilege escalation"),
    (
        r"/etc/(shadow|gshadow|sudoers)|\.ssh/|\.gnupg|\bid_(rsa|ed25519|ecdsa)\b|authorized_keys",
        "Accesses sensitive credential files",
    ),
    (
        r"\b(nc|ncat|netcat)\s+(\S+\s+)*-[a-zA-Z]*l|\bsocat\b.*\b(TCP|UDP)[46]?-LISTEN",
        "Opens network listener",
    ),
    (
        r"\bbase64\s+(\S+\s+)*(-d\b|--decode\b|-[a-zA-Z]*d\b)",
        "Base64 decoding (possible obfuscation)",
    ),
];

static COMPILED: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|(pattern, reason)| match Regex::new(pattern) {
            Ok(pattern) => Some(Rule { pattern, reason }),
            Err(e) => {
                tracing::error!("Invalid scanner rule {:?}: {}", pattern, e);
                None
            }
        })
        .collect()
});

/// Scan recipe text with the default per-rule policy
pub fn scan(content: &str) -> Vec<DangerousCommand> {
    scan_with_policy(content, ScanPolicy::PerRule)
}

/// Scan recipe text, recording matches according to `policy`
pub fn scan_with_policy(content: &str, policy: ScanPolicy) -> Vec<DangerousCommand> {
    let mut found = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        for rule in COMPILED.iter() {
            if rule.pattern.is_match(trimmed) {
                found.push(DangerousCommand {
                    line: idx + 1,
                    text: trimmed.to_string(),
                    reason: rule.reason.to_string(),
                });
                if policy == ScanPolicy::PerLine {
                    break;
                }
            }
        }
    }

    found
}
