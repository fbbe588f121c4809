//! Hides secret values and obvious PII in text headed for logs.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::RwLock;

const MASK: &str = "***MASK***";

static SECRET_LITERALS: Lazy<RwLock<HashSet<String>>> = Lazy::new(|| RwLock::new(HashSet::new()));

static PII_REGEX: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // e‑mail
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
        // tel (simple intl)
        Regex::new(r"\+?\d[\d\-]{8,}\d").unwrap(),
    ]
});

pub fn register_secret(raw: &str) {
    if raw.is_empty() {
        return;
    }
    let mut guard = SECRET_LITERALS.write().unwrap_or_else(|e| e.into_inner());
    guard.insert(raw.to_string());
}

pub fn mask_text<S: AsRef<str>>(input: S) -> String {
    let mut s = input.as_ref().to_string();

    {
        let guard = SECRET_LITERALS.read().unwrap_or_else(|e| e.into_inner());
        // longest first, so a secret containing another is masked whole
        let mut secrets: Vec<&String> = guard.iter().collect();
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        for secret in secrets {
            if s.contains(secret.as_str()) {
                s = s.replace(secret.as_str(), MASK);
            }
        }
    }

    for re in PII_REGEX.iter() {
        if re.is_match(&s) {
            s = re.replace_all(&s, MASK).into_owned();
        }
    }

    s
}
