//! Common types used throughout Tethersync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest identifier accepted by the hosted backend (PostgreSQL limit).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Check that `name` is a plain SQL identifier.
///
/// Accepts ASCII letters, digits and underscores, not starting with a digit.
/// Table and field names flow into SQL statements and URL paths, so anything
/// else is rejected up front.
pub fn validate_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Identifier cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(crate::Error::InvalidInput(format!(
            "Identifier too long ({} > {}): {}",
            name.len(),
            MAX_IDENTIFIER_LEN,
            name
        )));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(crate::Error::InvalidInput(format!(
            "Identifier cannot start with a digit: {}",
            name
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(crate::Error::InvalidInput(format!(
            "Identifier contains invalid characters: {}",
            name
        )));
    }
    Ok(())
}

/// Name of a sync-eligible table.
///
/// The same name is used on the remote backend and in the local store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Create a new TableName.
    ///
    /// # Errors
    /// - Returns error if `name` is not a plain identifier
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TableName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_table_name_creation() {
        let name = TableName::new("journal_entries").unwrap();
        assert_eq!(name.as_str(), "journal_entries");
        assert_eq!(name.to_string(), "journal_entries");
    }

    #[test]
    fn test_table_name_rejects_invalid() {
        assert!(TableName::new("").is_err());
        assert!(TableName::new("1messages").is_err());
        assert!(TableName::new("messages; drop table x").is_err());
        assert!(TableName::new("user-profiles").is_err());
        assert!(TableName::new("a".repeat(64)).is_err());
    }

    #[test]
    fn test_table_name_serde() {
        let name: TableName = serde_json::from_str("\"messages\"").unwrap();
        assert_eq!(name.as_str(), "messages");
        assert!(serde_json::from_str::<TableName>("\"bad name\"").is_err());
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"messages\"");
    }

    proptest! {
        #[test]
        fn prop_valid_identifiers_accepted(name in "[a-z_][a-z0-9_]{0,40}") {
            prop_assert!(TableName::new(name).is_ok());
        }

        #[test]
        fn prop_quotes_rejected(prefix in "[a-z]{1,10}", suffix in "[a-z]{0,10}") {
            let quoted = format!("{}\"{}", prefix, suffix);
            prop_assert!(validate_identifier(&quoted).is_err());
        }
    }
}
