/// Ordered key/value iterator with optional prefix filtering.
///
/// Wraps an index cursor. Keys and positions come from the cursor's snapshot;
/// values are read from the segments on demand at those positions.
use config::IteratorOptions;
use index::IndexCursor;

use crate::read::value_at;
use crate::{Engine, Result};

/// Iterator returned by [`Engine::iter`].
///
/// Starts positioned at the first matching key.
pub struct DbIterator<'a> {
    engine: &'a Engine,
    cursor: Box<dyn IndexCursor>,
    options: IteratorOptions,
}

impl Engine {
    /// Opens an iterator over live keys, filtered by `options.prefix` and
    /// ordered by `options.reverse`.
    ///
    /// The key order is fixed when the iterator is created. Unlike
    /// [`fold`](Engine::fold), the iterator does not hold the engine's read
    /// lock between steps: each [`value`](DbIterator::value) call takes it
    /// briefly. Segments are never removed from a running engine, so every
    /// snapshotted position stays readable, and writes may proceed while the
    /// iterator is alive.
    pub fn iter(&self, options: IteratorOptions) -> Result<DbIterator<'_>> {
        let cursor = self.index.cursor(options.reverse)?;
        let mut it = DbIterator {
            engine: self,
            cursor,
            options,
        };
        it.skip_to_prefix()?;
        Ok(it)
    }
}

impl DbIterator<'_> {
    /// Moves back to the first matching key.
    pub fn rewind(&mut self) -> Result<()> {
        self.cursor.rewind()?;
        self.skip_to_prefix()
    }

    /// Moves to the first matching key `>= key` (`<= key` when reversed).
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.cursor.seek(key)?;
        self.skip_to_prefix()
    }

    pub fn next(&mut self) -> Result<()> {
        self.cursor.next()?;
        self.skip_to_prefix()
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.cursor.valid()
    }

    /// Current key, or `None` once exhausted.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.cursor.key()
    }

    /// Reads the current value from its segment.
    pub fn value(&self) -> Result<Option<Vec<u8>>> {
        let Some(pos) = self.cursor.value() else {
            return Ok(None);
        };
        let state = self.engine.state.read();
        value_at(&state, &pos).map(Some)
    }

    /// Releases the cursor's snapshot.
    pub fn close(&mut self) {
        self.cursor.close();
    }

    fn skip_to_prefix(&mut self) -> Result<()> {
        let prefix = &self.options.prefix;
        if prefix.is_empty() {
            return Ok(());
        }
        while let Some(key) = self.cursor.key() {
            if key.starts_with(prefix) {
                break;
            }
            self.cursor.next()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DbIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIterator")
            .field("options", &self.options)
            .field("valid", &self.cursor.valid())
            .finish()
    }
}
