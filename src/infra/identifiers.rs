//! Identifier list sources.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::core::{CollectorError, IdentifierSource};

/// Fixed identifier list.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentifiers {
    identifiers: Vec<String>,
}

impl StaticIdentifiers {
    /// Serve `identifiers` on every load, as given.
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl IdentifierSource for StaticIdentifiers {
    async fn load(&self) -> Result<Vec<String>, CollectorError> {
        Ok(self.identifiers.clone())
    }
}

/// Identifier list read from a JSON array of strings on every load.
///
/// Entries are trimmed and blank entries dropped. Order and duplicates are
/// kept.
#[derive(Debug, Clone)]
pub struct JsonFileIdentifiers {
    path: PathBuf,
}

impl JsonFileIdentifiers {
    /// Read identifiers from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IdentifierSource for JsonFileIdentifiers {
    async fn load(&self) -> Result<Vec<String>, CollectorError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let identifiers = parse_identifier_list(&raw)?;
        info!(
            path = %self.path.display(),
            count = identifiers.len(),
            "loaded identifiers"
        );
        Ok(identifiers)
    }
}

/// Parse a JSON array of identifier strings.
///
/// # Errors
///
/// `InvalidPayload` if the document is not an array of strings, `Json` if it
/// is not JSON at all.
pub fn parse_identifier_list(raw: &str) -> Result<Vec<String>, CollectorError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let items = value.as_array().ok_or_else(|| {
        CollectorError::InvalidPayload("identifier file must contain an array".into())
    })?;

    items
        .iter()
        .filter_map(|item| match item.as_str() {
            Some(s) if s.trim().is_empty() => None,
            Some(s) => Some(Ok(s.trim().to_string())),
            None => Some(Err(CollectorError::InvalidPayload(format!(
                "identifier entries must be strings, found {item}"
            )))),
        })
        .collect()
}
