use bytes::Bytes;

use super::Session;
use crate::utils::cluster::key_successor;
use crate::Error;
use crate::ErrorCode;
use crate::KvPair;
use crate::Result;
use crate::ScanBatch;

/// Forward iterator over `[start, end)` of one session.
///
/// Pairs are fetched in batches of `scan_batch_size`; the next batch starts
/// right after the last key of the previous one, so no pair is returned
/// twice. The cursor borrows its session and cannot outlive it.
///
/// ```ignore
/// let mut cursor = session.scan("a", "b")?;
/// while !cursor.done() {
///     println!("{:?}", cursor.key()?);
///     cursor.advance()?;
/// }
/// assert_eq!(cursor.error(), ErrorCode::Ok);
/// ```
#[derive(Debug)]
pub struct ScanCursor<'a> {
    session: &'a Session,
    end_key: Bytes,
    buffer: Vec<KvPair>,
    offset: usize,
    has_more: bool,
    error: ErrorCode,
    error_reported: bool,
}

impl Session {
    /// Opens a cursor on `[start, end)` and fetches its first batch.
    pub fn scan(
        &self,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
    ) -> Result<ScanCursor<'_>> {
        let end_key = Bytes::copy_from_slice(end.as_ref());
        let first = self.scan_once(start, &end_key)?;
        Ok(ScanCursor::new(self, end_key, first))
    }
}

impl<'a> ScanCursor<'a> {
    fn new(
        session: &'a Session,
        end_key: Bytes,
        first: ScanBatch,
    ) -> Self {
        let mut cursor = Self {
            session,
            end_key,
            buffer: Vec::new(),
            offset: 0,
            has_more: false,
            error: ErrorCode::Ok,
            error_reported: false,
        };
        cursor.load(first);
        cursor
    }

    /// `true` once every pair of the range was consumed, or a fetch failed.
    pub fn done(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    pub fn key(&self) -> Result<&Bytes> {
        self.current().map(|p| &p.key)
    }

    pub fn value(&self) -> Result<&Bytes> {
        self.current().map(|p| &p.value)
    }

    pub fn pair(&self) -> Result<&KvPair> {
        self.current()
    }

    /// Outcome of the most recent batch fetch.
    pub fn error(&self) -> ErrorCode {
        self.error
    }

    /// Moves to the next pair, fetching a new batch when the current one is
    /// consumed.
    ///
    /// # Errors
    /// [`Error::ScanExhausted`] when the cursor is already done.
    pub fn advance(&mut self) -> Result<()> {
        if self.done() {
            return Err(Error::ScanExhausted);
        }
        self.step();
        Ok(())
    }

    fn step(&mut self) {
        self.offset += 1;
        if self.offset >= self.buffer.len() && self.has_more {
            self.fetch_next();
        }
    }

    fn current(&self) -> Result<&KvPair> {
        self.buffer.get(self.offset).ok_or(Error::ScanExhausted)
    }

    fn fetch_next(&mut self) {
        let Some(last) = self.buffer.last() else {
            self.has_more = false;
            return;
        };
        let start = key_successor(&last.key);
        match self.session.scan_once(start, &self.end_key) {
            Ok(batch) => self.load(batch),
            Err(e) => {
                self.buffer.clear();
                self.offset = 0;
                self.has_more = false;
                self.error = e.code();
            }
        }
    }

    fn load(
        &mut self,
        batch: ScanBatch,
    ) {
        // A batch without items cannot be continued from
        self.has_more = batch.has_more && !batch.items.is_empty();
        self.buffer = batch.items;
        self.offset = 0;
        self.error = ErrorCode::Ok;
    }
}

impl Iterator for ScanCursor<'_> {
    type Item = Result<KvPair>;

    /// Yields each pair once; a failed fetch is yielded once as an error,
    /// then iteration ends.
    fn next(&mut self) -> Option<Self::Item> {
        if self.done() {
            if !self.error.is_ok() && !self.error_reported {
                self.error_reported = true;
                return Some(Err(Error::status(self.error, "scan batch fetch failed")));
            }
            return None;
        }
        let pair = self.buffer[self.offset].clone();
        self.step();
        Some(Ok(pair))
    }
}
