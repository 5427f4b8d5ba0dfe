//! Paged reads from the remote backend.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use tethersync_common::{Error, RemoteRecord, Result, TableName};
use tethersync_remote::{OrderBy, RemoteBackend};

use crate::config::SyncTarget;

/// Fetches a table's records page by page.
pub struct BatchFetcher {
    backend: Arc<dyn RemoteBackend>,
    page_delay: Duration,
}

impl BatchFetcher {
    pub fn new(backend: Arc<dyn RemoteBackend>, page_delay: Duration) -> Self {
        Self {
            backend,
            page_delay,
        }
    }

    /// Total records in `table`, taken once before paging.
    pub async fn count(&self, table: &TableName) -> Result<usize> {
        self.backend.count(table).await
    }

    pub async fn fetch_page(
        &self,
        table: &TableName,
        offset: usize,
        limit: usize,
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<RemoteRecord>> {
        self.backend
            .select_range(table, offset, limit, order_by)
            .await
    }

    /// Cursor over `target`'s pages given a previously counted `total`.
    pub fn cursor(&self, target: &SyncTarget, total: usize) -> PageCursor<'_> {
        PageCursor {
            fetcher: self,
            table: target.table.clone(),
            order_by: target.order_by.clone(),
            limit: target.page_size(),
            total,
            offset: 0,
            fetched: 0,
            done: false,
        }
    }
}

/// One step of a paged read.
#[derive(Debug)]
pub enum Page {
    Records {
        offset: usize,
        records: Vec<RemoteRecord>,
    },
    /// The page could not be read. The cursor has already moved past it.
    Failed {
        offset: usize,
        limit: usize,
        error: Error,
    },
}

/// Walks a table from offset 0 in steps of the page size.
///
/// Paging stops at the first empty page or once the offset reaches the
/// counted total, whichever comes first. A failed page does not stop it.
pub struct PageCursor<'a> {
    fetcher: &'a BatchFetcher,
    table: TableName,
    order_by: Option<OrderBy>,
    limit: usize,
    total: usize,
    offset: usize,
    fetched: usize,
    done: bool,
}

impl PageCursor<'_> {
    pub async fn next_page(&mut self) -> Option<Page> {
        if self.done || self.offset >= self.total {
            return None;
        }
        if self.fetched > 0 && !self.fetcher.page_delay.is_zero() {
            tokio::time::sleep(self.fetcher.page_delay).await;
        }

        let offset = self.offset;
        let limit = self.limit;
        self.fetched += 1;
        self.offset += limit;

        match self
            .fetcher
            .fetch_page(&self.table, offset, limit, self.order_by.as_ref())
            .await
        {
            Ok(records) if records.is_empty() => {
                debug!("{}: empty page at offset {}, done", self.table, offset);
                self.done = true;
                None
            }
            Ok(records) => {
                debug!(
                    "{}: fetched {} records at offset {}",
                    self.table,
                    records.len(),
                    offset
                );
                Some(Page::Records { offset, records })
            }
            Err(error) => Some(Page::Failed {
                offset,
                limit,
                error,
            }),
        }
    }

    /// Offset of the next page to fetch.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Pages requested so far, including failed ones.
    pub fn pages_fetched(&self) -> usize {
        self.fetched
    }
}
