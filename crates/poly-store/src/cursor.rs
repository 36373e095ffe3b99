use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::traits::{Entry, IterOptions, KeyValueStore};

/// Lazy, paged iteration over a range.
///
/// Each page is a fresh `range` call resuming strictly after the last key
/// yielded, so a cursor never holds backend state across suspension points.
/// Entries written behind the cursor position are not revisited; entries
/// ahead of it are picked up by later pages. [`Cursor::restart`] rewinds to
/// the original bounds.
pub struct Cursor {
    store: Arc<dyn KeyValueStore>,
    options: IterOptions,
    page_size: usize,
    strip: usize,
    buffer: VecDeque<Entry>,
    last_key: Option<Vec<u8>>,
    yielded: usize,
    exhausted: bool,
}

impl Cursor {
    pub fn new(store: Arc<dyn KeyValueStore>, options: IterOptions, page_size: usize) -> Self {
        Self {
            store,
            options,
            page_size: page_size.max(1),
            strip: 0,
            buffer: VecDeque::new(),
            last_key: None,
            yielded: 0,
            exhausted: false,
        }
    }

    /// Drop the first `len` bytes of every yielded key.
    pub(crate) fn strip_prefix(mut self, len: usize) -> Self {
        self.strip = len;
        self
    }

    /// Rewind to the start of the range.
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.last_key = None;
        self.yielded = 0;
        self.exhausted = false;
    }

    pub async fn next(&mut self) -> StoreResult<Option<Entry>> {
        if let Some(limit) = self.options.limit {
            if self.yielded >= limit {
                return Ok(None);
            }
        }

        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }

        let Some((key, value)) = self.buffer.pop_front() else {
            return Ok(None);
        };
        self.yielded += 1;
        let key = key.get(self.strip..).unwrap_or_default().to_vec();
        Ok(Some((key, value)))
    }

    /// Drain the remaining entries.
    pub async fn collect(&mut self) -> StoreResult<Vec<Entry>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await? {
            out.push(entry);
        }
        Ok(out)
    }

    async fn fill(&mut self) -> StoreResult<()> {
        let mut page = self.options.clone();
        let remaining = self
            .options
            .limit
            .map(|limit| limit - self.yielded)
            .unwrap_or(usize::MAX);
        let want = self.page_size.min(remaining);
        page.limit = Some(want);

        if let Some(last) = &self.last_key {
            if self.options.reverse {
                page.lt = Some(last.clone());
                page.lte = None;
            } else {
                page.gt = Some(last.clone());
                page.gte = None;
            }
        }

        let entries = self.store.range(&page).await?;
        if entries.len() < want {
            self.exhausted = true;
        }
        if let Some((key, _)) = entries.last() {
            self.last_key = Some(key.clone());
        }
        self.buffer.extend(entries);
        Ok(())
    }
}
