use super::page::{PageIndex, PageStorage};
use crate::fs::{Ino, PAGE_SIZE};
use spin::RwLock;

type Page = [u8; PAGE_SIZE];

/// File content for every inode, held in memory as `pages_per_file` fixed-size
/// pages per inode slot. Page `index` of inode `ino` lives at slot
/// `ino * pages_per_file + index`.
pub(crate) struct PageStore {
    pages: Vec<RwLock<Page>>,
    /// The number of inodes the store was sized for.
    inode_count: usize,
    pages_per_file: usize,
}

impl PageStore {
    /// Allocates zeroed storage for `inode_count` files of `pages_per_file` pages.
    pub fn new(inode_count: usize, pages_per_file: usize) -> Self {
        let pages = (0..inode_count * pages_per_file)
            .map(|_| RwLock::new([0; PAGE_SIZE]))
            .collect();
        Self {
            pages,
            inode_count,
            pages_per_file,
        }
    }

    /// Runs `f` over a shared view of the page, or returns None if the page is
    /// out of range.
    pub fn read<V>(&self, ino: Ino, index: PageIndex, f: impl FnOnce(&[u8]) -> V) -> Option<V> {
        let page = self.slot(ino, index)?.read();
        Some(f(&page[..]))
    }

    /// Runs `f` over an exclusive view of the page, or returns None if the page
    /// is out of range. The page stays locked for the whole call.
    pub fn modify<V>(
        &self,
        ino: Ino,
        index: PageIndex,
        f: impl FnOnce(&mut [u8]) -> V,
    ) -> Option<V> {
        let mut page = self.slot(ino, index)?.write();
        Some(f(&mut page[..]))
    }

    /// Zeroes every page belonging to `ino`.
    pub fn clear_file(&self, ino: Ino) {
        for index in 0..self.pages_per_file {
            self.modify(ino, index, |page| page.iter_mut().for_each(|b| *b = 0));
        }
    }

    fn slot(&self, ino: Ino, index: PageIndex) -> Option<&RwLock<Page>> {
        let ino = ino as usize;
        if ino >= self.inode_count || index >= self.pages_per_file {
            return None;
        }
        self.pages.get(ino * self.pages_per_file + index)
    }
}

impl PageStorage for PageStore {
    fn read_page(&self, ino: Ino, index: PageIndex, buf: &mut [u8]) -> usize {
        let copied = self.read(ino, index, |page| {
            let len = buf.len().min(PAGE_SIZE);
            buf[..len].copy_from_slice(&page[..len]);
            len
        });
        match copied {
            Some(len) => len,
            None => {
                warn!("read_page out of range, ino={}, index={}", ino, index);
                buf.iter_mut().for_each(|b| *b = 0);
                0
            }
        }
    }

    fn write_page(&self, ino: Ino, index: PageIndex, buf: &[u8]) -> usize {
        let stored = self.modify(ino, index, |page| {
            let len = buf.len().min(PAGE_SIZE);
            page[..len].copy_from_slice(&buf[..len]);
            len
        });
        stored.unwrap_or_else(|| {
            warn!("write_page out of range, ino={}, index={}", ino, index);
            0
        })
    }
}
