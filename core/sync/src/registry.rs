//! Known sync tables and discovery of new remote ones.

use std::collections::BTreeSet;
use tracing::debug;

use tethersync_common::{Result, TableName};
use tethersync_remote::RemoteBackend;

use crate::config::{SyncConfig, SyncTarget};

/// The set of tables a sync run covers.
///
/// A registry does not change while a run uses it; adopting a table yields a
/// new registry.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    targets: Vec<SyncTarget>,
    ignored_prefixes: Vec<String>,
    default_batch_size: usize,
}

impl TableRegistry {
    pub fn new(
        targets: Vec<SyncTarget>,
        ignored_prefixes: Vec<String>,
        default_batch_size: usize,
    ) -> Self {
        let default_batch_size = default_batch_size.max(1);
        let targets = targets
            .into_iter()
            .map(|mut target| {
                target.batch_size.get_or_insert(default_batch_size);
                target
            })
            .collect();
        Self {
            targets,
            ignored_prefixes,
            default_batch_size,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.tables.clone(),
            config.ignored_table_prefixes.clone(),
            config.batch_size,
        )
    }

    /// Configured targets in sync order.
    pub fn targets(&self) -> &[SyncTarget] {
        &self.targets
    }

    pub fn target(&self, table: &str) -> Option<&SyncTarget> {
        self.targets.iter().find(|t| t.table.as_str() == table)
    }

    pub fn list_known_tables(&self) -> BTreeSet<TableName> {
        self.targets.iter().map(|t| t.table.clone()).collect()
    }

    pub fn is_known(&self, table: &str) -> bool {
        self.target(table).is_some()
    }

    /// Tables in the remote catalog that are not known here, sorted.
    ///
    /// Names that are not valid table identifiers or that carry an ignored
    /// prefix are left out.
    pub async fn detect_new_tables(&self, backend: &dyn RemoteBackend) -> Result<Vec<TableName>> {
        let catalog = backend.list_tables().await?;
        let found: BTreeSet<TableName> = catalog
            .into_iter()
            .filter(|name| !self.is_ignored(name))
            .filter(|name| !self.is_known(name))
            .filter_map(|name| match TableName::new(name.as_str()) {
                Ok(table) => Some(table),
                Err(_) => {
                    debug!("Skipping catalog entry {:?}", name);
                    None
                }
            })
            .collect();
        Ok(found.into_iter().collect())
    }

    /// Pull target for a discovered table.
    pub fn target_for_discovered(&self, table: TableName) -> SyncTarget {
        SyncTarget::pull(table).with_batch_size(self.default_batch_size)
    }

    /// A registry that also syncs `target`, after the existing ones.
    pub fn adopt(&self, target: SyncTarget) -> Self {
        let mut targets = self.targets.clone();
        if !self.is_known(target.table.as_str()) {
            targets.push(target);
        }
        Self::new(
            targets,
            self.ignored_prefixes.clone(),
            self.default_batch_size,
        )
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignored_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncDirection;
    use tethersync_remote::MemoryBackend;

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    fn registry() -> TableRegistry {
        TableRegistry::new(
            vec![
                SyncTarget::pull(table("messages")),
                SyncTarget::pull(table("journal_entries")).with_batch_size(10),
            ],
            vec!["_".to_string(), "pg_".to_string()],
            50,
        )
    }

    #[test]
    fn test_known_tables_and_batch_sizes() {
        let registry = registry();
        let known = registry.list_known_tables();
        assert_eq!(known.len(), 2);
        assert!(known.contains(&table("messages")));

        assert_eq!(registry.targets()[0].table.as_str(), "messages");
        assert_eq!(registry.targets()[0].batch_size, Some(50));
        assert_eq!(registry.targets()[1].batch_size, Some(10));
    }

    #[tokio::test]
    async fn test_detect_new_tables() {
        let backend = MemoryBackend::new();
        for name in ["messages", "streaks", "badges", "_migrations", "pg_stat", "journal_entries"] {
            backend.create_table(name);
        }

        let registry = registry();
        let found = registry.detect_new_tables(&backend).await.unwrap();

        assert_eq!(found, vec![table("badges"), table("streaks")]);
        // Detection does not change the known set.
        assert_eq!(registry.list_known_tables().len(), 2);
    }

    #[tokio::test]
    async fn test_detect_propagates_backend_errors() {
        let backend = MemoryBackend::new();
        backend.set_reachable(false);
        let err = registry().detect_new_tables(&backend).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_adopt_returns_new_registry() {
        let registry = registry();
        let target = registry.target_for_discovered(table("streaks"));
        assert_eq!(target.direction, SyncDirection::Pull);
        assert_eq!(target.batch_size, Some(50));

        let adopted = registry.adopt(target.clone());
        assert_eq!(adopted.targets().len(), 3);
        assert_eq!(adopted.targets()[2].table.as_str(), "streaks");
        assert_eq!(registry.targets().len(), 2);

        let again = adopted.adopt(target);
        assert_eq!(again.targets().len(), 3);
    }
}
