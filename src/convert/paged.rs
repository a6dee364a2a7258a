// ABOUTME: Bounded-memory, key-ordered traversal of a table's (key, value) pairs
// ABOUTME: Fetches fixed-size offset/limit windows until the first empty fetch

use crate::db::{Connection, PageQuery};
use crate::schema::Row;
use anyhow::{bail, Result};

/// Forward-only reader over one two-column projection
///
/// Each call to [`PagedReader::next_page`] issues exactly one fetch at the
/// next offset. The sequence ends at the first fetch that returns no rows, so
/// a table of `R` rows read with page size `N` costs `ceil(R / N) + 1`
/// fetches. Once exhausted the reader never fetches again.
pub struct PagedReader {
    query: PageQuery,
    page_size: u64,
    offset: u64,
    fetches: u64,
    rows_read: u64,
    exhausted: bool,
}

impl PagedReader {
    pub fn new(query: PageQuery, page_size: u64) -> Result<Self> {
        if page_size == 0 {
            bail!("Page size must be greater than zero");
        }

        Ok(Self {
            query,
            page_size,
            offset: 0,
            fetches: 0,
            rows_read: 0,
            exhausted: false,
        })
    }

    /// Fetch the next page, or `None` once a fetch comes back empty
    pub async fn next_page<C>(&mut self, conn: &mut C) -> Result<Option<Vec<Row>>>
    where
        C: Connection + ?Sized,
    {
        if self.exhausted {
            return Ok(None);
        }

        let page = conn
            .fetch_page(&self.query, self.page_size, self.offset)
            .await?;
        self.fetches += 1;

        if page.is_empty() {
            self.exhausted = true;
            tracing::debug!(
                "Reached end of {}.{} after {} fetches ({} rows)",
                self.query.table,
                self.query.value_column,
                self.fetches,
                self.rows_read
            );
            return Ok(None);
        }

        self.offset += self.page_size;
        self.rows_read += page.len() as u64;
        Ok(Some(page))
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
