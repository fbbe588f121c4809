use std::collections::HashSet;

use crate::action::ActionStep;
use crate::error::ConfigError;

/// Ordered, validated steps of one run. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    name: String,
    steps: Vec<ActionStep>,
}

impl ActionTable {
    pub fn new(steps: Vec<ActionStep>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::with_capacity(steps.len());
        for step in &steps {
            step.validate()?;
            if !seen.insert(&step.key) {
                return Err(ConfigError::DuplicateKey(step.key.clone()));
            }
        }
        Ok(Self {
            name: String::new(),
            steps,
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionStep> {
        self.steps.iter()
    }

    #[cfg(test)]
    pub fn get(&self, key: &crate::action::StepKey) -> Option<&ActionStep> {
        self.steps.iter().find(|s| &s.key == key)
    }
}
