use crate::fs::Ino;

/// The page number within a file, ranging from 0 (the first page) to
/// `PAGES_PER_FILE - 1` (the last page).
pub type PageIndex = usize;

/// The backing store a page cache reads through on a miss and flushes to on
/// writeback.
///
/// Pages outside the store are holes rather than errors: callers are expected to
/// have clamped their ranges against the file size already, so an out-of-range
/// access is dropped instead of failing.
pub trait PageStorage {
    /// Copies a page into `buf` and returns the number of bytes copied. A buffer
    /// shorter than a page receives a prefix of it.
    ///
    /// Reading a page out of range zero fills `buf` and returns 0.
    fn read_page(&self, ino: Ino, index: PageIndex, buf: &mut [u8]) -> usize;
    /// Stores `buf` at the start of the page and returns the number of bytes
    /// stored. Bytes past the page size are truncated.
    ///
    /// Writing a page out of range stores nothing and returns 0.
    fn write_page(&self, ino: Ino, index: PageIndex, buf: &[u8]) -> usize;
}
