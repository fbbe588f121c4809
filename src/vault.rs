use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConfigError;
use crate::mask;
use crate::table::ActionTable;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{secret:([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Source of values for `{secret:NAME}` placeholders in typed text.
pub struct Vault {
    lookup: Lookup,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    /// `{secret:NAME}` reads the environment variable `NAME`.
    pub fn from_env() -> Self {
        Self {
            lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: std::collections::HashMap<String, String> =
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            lookup: Box::new(move |name| map.get(name).cloned()),
        }
    }

    pub fn get_secret(&self, label: &str) -> Option<String> {
        (self.lookup)(label)
    }

    /// Substitutes every placeholder and registers the values for masking.
    /// `Err` carries the first name that could not be resolved.
    pub fn resolve(&self, text: &str) -> Result<String, String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = self
                .get_secret(name.as_str())
                .ok_or_else(|| name.as_str().to_string())?;
            mask::register_secret(&value);
            out.push_str(&text[last..whole.start()]);
            out.push_str(&value);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Fails on the first step whose text names a secret this vault cannot supply.
    pub fn check_table(&self, table: &ActionTable) -> Result<(), ConfigError> {
        for step in table.iter() {
            for name in placeholders(&step.type_text) {
                if self.get_secret(name).is_none() {
                    return Err(ConfigError::MissingSecret {
                        key: step.key.clone(),
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

pub fn placeholders(text: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}
