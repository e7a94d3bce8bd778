use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::ExpectedForm;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read expected-forms config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("expected-forms config is not a JSON array of objects: {0}")]
    NotAnArray(#[source] serde_json::Error),
    #[error("expected-forms entry {index} is invalid: {source}")]
    Entry {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("expected-forms entry {index} ({form_number}) has an empty expected_title")]
    EmptyTitle { index: usize, form_number: String },
    #[error("expected-forms entry {index} ({form_number}) has expected_pages = 0")]
    ZeroPages { index: usize, form_number: String },
}

/// Expected forms keyed by form number. Immutable once loaded.
///
/// Duplicate form numbers resolve last-wins: a later entry replaces an earlier
/// one and the override is logged.
#[derive(Debug, Clone, Default)]
pub struct ExpectedFormRegistry {
    forms: HashMap<String, ExpectedForm>,
}

impl ExpectedFormRegistry {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_json_slice(&raw)?;
        info!(
            path = %path.display(),
            forms = registry.len(),
            "loaded expected-forms config"
        );
        Ok(registry)
    }

    pub fn from_json_slice(raw: &[u8]) -> Result<Self, ConfigError> {
        let entries: Vec<Value> = serde_json::from_slice(raw).map_err(ConfigError::NotAnArray)?;

        let mut descriptors = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let form: ExpectedForm = serde_json::from_value(entry)
                .map_err(|source| ConfigError::Entry { index, source })?;
            descriptors.push(form);
        }

        Self::load(descriptors)
    }

    pub fn load(descriptors: Vec<ExpectedForm>) -> Result<Self, ConfigError> {
        let mut forms = HashMap::with_capacity(descriptors.len());

        for (index, mut form) in descriptors.into_iter().enumerate() {
            form.form_number = form.form_number.trim().to_string();

            if form.expected_title.trim().is_empty() {
                return Err(ConfigError::EmptyTitle {
                    index,
                    form_number: form.form_number,
                });
            }
            if form.expected_pages == 0 {
                return Err(ConfigError::ZeroPages {
                    index,
                    form_number: form.form_number,
                });
            }

            if let Some(previous) = forms.insert(form.form_number.clone(), form) {
                warn!(
                    index,
                    form_number = %previous.form_number,
                    replaced_title = %previous.expected_title,
                    "duplicate form number in config; later entry wins"
                );
            }
        }

        Ok(Self { forms })
    }

    pub fn lookup(&self, form_number: Option<&str>) -> Option<&ExpectedForm> {
        form_number.and_then(|number| self.forms.get(number.trim()))
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}
