//! Offset-paginated extraction of a single source table.

use futures::stream::{self, Stream, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{Record, SourceReader};
use crate::error::{MigrateError, Result};

/// One page of records and the offset it was read from.
#[derive(Debug, Clone)]
pub struct Page {
    /// Offset of the first record in this page.
    pub offset: u64,
    /// Records in source order.
    pub records: Vec<Record>,
}

impl Page {
    /// Offset to request after this page.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.records.len() as u64
    }
}

/// Every record of a table, read to completion.
#[derive(Debug, Clone, Default)]
pub struct ExtractedTable {
    pub records: Vec<Record>,
    /// Number of page requests issued, including a trailing empty page.
    pub pages: usize,
}

/// Paginated reader over one source table at a time.
///
/// Holds no per-table state: each call to [`Extractor::pages`] starts a fresh
/// cursor, which is what lets a failed table be re-read from any known
/// offset without touching earlier pages.
pub struct Extractor<'a> {
    source: &'a dyn SourceReader,
    page_size: usize,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a dyn SourceReader, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
        }
    }

    /// Lazily request `[offset, offset + page_size)` ranges starting at
    /// `start_offset`.
    ///
    /// The stream ends after a page shorter than `page_size` (or an empty
    /// one). One request is outstanding at a time.
    pub fn pages(&self, table: &str, start_offset: u64) -> impl Stream<Item = Result<Page>> + 'a {
        let source = self.source;
        let page_size = self.page_size;
        let table = table.to_string();

        stream::try_unfold(Some(start_offset), move |cursor| {
            let table = table.clone();
            async move {
                let Some(offset) = cursor else {
                    return Ok(None);
                };

                let records = source
                    .read_page(&table, offset, page_size)
                    .await
                    .map_err(|e| match e {
                        e @ MigrateError::SourceRead { .. } => e,
                        other => MigrateError::source_read(&table, other),
                    })?;

                debug!(
                    "{}: read {} rows at offset {}",
                    table,
                    records.len(),
                    offset
                );

                if records.is_empty() {
                    return Ok(None);
                }

                let page = Page { offset, records };
                let next = (page.records.len() >= page_size).then(|| page.next_offset());
                Ok::<_, MigrateError>(Some((page, next)))
            }
        })
    }

    /// Read the whole table.
    ///
    /// Any page failure discards what was read so far: callers get either the
    /// complete record set or an error. Cancellation is checked between pages.
    pub async fn extract_all(
        &self,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractedTable> {
        let mut extracted = ExtractedTable::default();
        let pages = self.pages(table, 0);
        futures::pin_mut!(pages);

        loop {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            extracted.pages += 1;
            match pages.try_next().await? {
                Some(page) => {
                    let full = page.records.len() >= self.page_size;
                    extracted.records.extend(page.records);
                    if !full {
                        break;
                    }
                }
                None => break,
            }
        }

        Ok(extracted)
    }
}
