use crate::alloc::{Bitmap, State};
use crate::fs::{AFSError, Ino, DIR_ENTRY_COUNT, INODE_COUNT, NAME_LEN, PAGE_SIZE};
use crate::io::{PageIndex, PageStore};

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// The directory table is stored at the start of this page of the directory inode.
pub const DIR_DATA_PAGE: PageIndex = 0;

/// One name to inode mapping. The name field is NUL terminated unless it uses the
/// whole field width.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy)]
pub struct RawDirEntry {
    name: [u8; NAME_LEN],
    ino: u32,
}

impl RawDirEntry {
    fn new(name: &[u8], ino: Ino) -> Self {
        let mut entry = Self::new_zeroed();
        entry.name[..name.len()].copy_from_slice(name);
        entry.ino = ino;
        entry
    }

    /// The stored name up to its terminator.
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..len]
    }

    pub fn ino(&self) -> Ino {
        self.ino
    }
}

/// The occupancy bitmap and entry table of one directory. Entry `k` means
/// something only while bit `k` of the bitmap is set.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy)]
pub struct DirData {
    bitmap: Bitmap,
    entries: [RawDirEntry; DIR_ENTRY_COUNT],
}

const _: () = assert!(DIR_ENTRY_COUNT <= Bitmap::BITS);
const _: () = assert!(std::mem::size_of::<DirData>() <= PAGE_SIZE);

impl DirData {
    /// Stores the pair in the lowest free slot and returns the slot, or None when
    /// every slot is taken. A full table is left untouched.
    pub fn insert(&mut self, name: &[u8], ino: Ino) -> Option<usize> {
        let slot = self.bitmap.first_free(DIR_ENTRY_COUNT)?;
        self.entries[slot] = RawDirEntry::new(bounded(name), ino);
        self.bitmap.set_reserved(slot);
        Some(slot)
    }

    /// Returns the slot and entry of the first occupied slot whose name matches.
    pub fn find(&self, name: &[u8]) -> Option<(usize, &RawDirEntry)> {
        let name = bounded(name);
        self.bitmap
            .used(0, DIR_ENTRY_COUNT)
            .map(|slot| (slot, &self.entries[slot]))
            .find(|(_, entry)| entry.name() == name)
    }

    /// Returns the first occupied slot at or after `pos` with its entry.
    pub fn next_from(&self, pos: usize) -> Option<(usize, &RawDirEntry)> {
        self.bitmap
            .next_used(pos, DIR_ENTRY_COUNT)
            .map(|slot| (slot, &self.entries[slot]))
    }

    /// Releases the slot and returns the entry it held.
    pub fn remove_slot(&mut self, slot: usize) -> Option<RawDirEntry> {
        if slot >= DIR_ENTRY_COUNT || self.bitmap.get(slot) == State::Free {
            return None;
        }
        let entry = self.entries[slot];
        self.bitmap.set_free(slot);
        self.entries[slot] = RawDirEntry::new_zeroed();
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.bitmap.count_used(DIR_ENTRY_COUNT)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.bitmap.first_free(DIR_ENTRY_COUNT).is_none()
    }
}

/// Names keep at most `NAME_LEN - 1` bytes so the field always has room for
/// its terminator. Anything past that is cut off.
fn bounded(name: &[u8]) -> &[u8] {
    let name = match name.iter().position(|&b| b == 0) {
        Some(nul) => &name[..nul],
        None => name,
    };
    &name[..name.len().min(NAME_LEN - 1)]
}

/// Directory tables living in page 0 of each directory inode.
///
/// Every call decodes the table, works on it and writes it back while holding
/// the page's write lock, so each operation is atomic with respect to other
/// operations on the same directory.
pub struct DirStore<'a> {
    pages: &'a PageStore,
}

impl<'a> DirStore<'a> {
    pub(crate) fn new(pages: &'a PageStore) -> Self {
        Self { pages }
    }

    /// Runs `f` over the decoded table of `dir` and stores the result back.
    pub fn modify<V>(&self, dir: Ino, f: impl FnOnce(&mut DirData) -> V) -> Result<V, AFSError> {
        check_dir(dir)?;
        self.pages
            .modify(dir, DIR_DATA_PAGE, |page| -> Option<V> {
                let mut data = DirData::read_from_prefix(page)?;
                let ret = f(&mut data);
                data.write_to_prefix(page)?;
                Some(ret)
            })
            .flatten()
            .ok_or_else(|| no_table(dir))
    }

    /// Runs `f` over a decoded copy of the table of `dir`.
    pub fn read<V>(&self, dir: Ino, f: impl FnOnce(&DirData) -> V) -> Result<V, AFSError> {
        check_dir(dir)?;
        self.pages
            .read(dir, DIR_DATA_PAGE, |page| {
                DirData::read_from_prefix(page).map(|data| f(&data))
            })
            .flatten()
            .ok_or_else(|| no_table(dir))
    }

    /// Resets `dir` to an empty table.
    pub fn init(&self, dir: Ino) -> Result<(), AFSError> {
        self.modify(dir, |data| *data = DirData::new_zeroed())
    }

    pub fn insert(&self, dir: Ino, name: &[u8], child: Ino) -> Result<usize, AFSError> {
        let slot = self.modify(dir, |data| data.insert(name, child))?;
        match slot {
            Some(slot) => {
                debug!("dir insert, dir={}, slot={}, ino={}", dir, slot, child);
                Ok(slot)
            }
            None => {
                warn!("not enough space for dir, ino={}", dir);
                Err(AFSError::NoSpace)
            }
        }
    }

    pub fn lookup(&self, dir: Ino, name: &[u8]) -> Result<Option<Ino>, AFSError> {
        self.read(dir, |data| data.find(name).map(|(_, entry)| entry.ino()))
    }

    /// Removes the entry called `name` and returns the inode it pointed at.
    pub fn remove(&self, dir: Ino, name: &[u8]) -> Result<Ino, AFSError> {
        self.modify(dir, |data| -> Option<Ino> {
            let slot = data.find(name).map(|(slot, _)| slot)?;
            data.remove_slot(slot).map(|entry| entry.ino())
        })?
        .ok_or(AFSError::DoesNotExist)
    }

    pub fn len(&self, dir: Ino) -> Result<usize, AFSError> {
        self.read(dir, DirData::len)
    }

    /// Lazily walks the occupied slots of `dir` at or after `pos`.
    pub fn iterate(&self, dir: Ino, pos: usize) -> Result<DirIter<'a>, AFSError> {
        check_dir(dir)?;
        Ok(DirIter {
            pages: self.pages,
            dir,
            pos,
        })
    }
}

/// Yields `(slot, name, ino)` for each occupied slot. Each step re-reads the
/// table, so the walk is not a snapshot: entries inserted or removed between
/// steps may or may not be seen.
pub struct DirIter<'a> {
    pages: &'a PageStore,
    dir: Ino,
    pos: usize,
}

impl<'a> DirIter<'a> {
    /// The cursor to resume from. It is a slot position, not an entry count.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }
}

impl<'a> Iterator for DirIter<'a> {
    type Item = (usize, Vec<u8>, Ino);

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.pos;
        let found = DirStore::new(self.pages)
            .read(self.dir, |data| {
                data.next_from(pos)
                    .map(|(slot, entry)| (slot, entry.name().to_vec(), entry.ino()))
            })
            .ok()
            .flatten();
        match found {
            Some(item) => {
                self.pos = item.0 + 1;
                Some(item)
            }
            None => {
                self.pos = DIR_ENTRY_COUNT;
                None
            }
        }
    }
}

fn check_dir(dir: Ino) -> Result<(), AFSError> {
    if dir as usize >= INODE_COUNT {
        return Err(AFSError::InvalidArgument(format!(
            "directory inode {} out of range",
            dir
        )));
    }
    Ok(())
}

fn no_table(dir: Ino) -> AFSError {
    AFSError::InvalidArgument(format!("no directory table for inode {}", dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::PAGES_PER_FILE;

    fn store() -> PageStore {
        PageStore::new(INODE_COUNT, PAGES_PER_FILE)
    }

    #[test]
    fn insert_then_lookup_returns_child() {
        let pages = store();
        let dirs = DirStore::new(&pages);

        dirs.insert(0, b"a.txt", 5).unwrap();

        assert_eq!(dirs.lookup(0, b"a.txt").unwrap(), Some(5));
        assert_eq!(dirs.lookup(0, b"missing").unwrap(), None);
        // Directories are independent.
        assert_eq!(dirs.lookup(1, b"a.txt").unwrap(), None);
    }

    #[test]
    fn full_directory_rejects_insert_without_change() {
        let pages = store();
        let dirs = DirStore::new(&pages);

        for i in 0..DIR_ENTRY_COUNT {
            let name = format!("file{}", i);
            dirs.insert(0, name.as_bytes(), i as Ino % 32).unwrap();
        }
        assert_eq!(dirs.len(0).unwrap(), DIR_ENTRY_COUNT);

        assert_eq!(dirs.insert(0, b"one-too-many", 1), Err(AFSError::NoSpace));
        assert_eq!(dirs.len(0).unwrap(), DIR_ENTRY_COUNT);
        assert_eq!(dirs.lookup(0, b"one-too-many").unwrap(), None);
    }

    #[test]
    fn lookup_compares_whole_names() {
        let pages = store();
        let dirs = DirStore::new(&pages);
        dirs.insert(0, b"abc", 1).unwrap();
        dirs.insert(0, b"abcd", 2).unwrap();

        assert_eq!(dirs.lookup(0, b"ab").unwrap(), None);
        assert_eq!(dirs.lookup(0, b"abc").unwrap(), Some(1));
        assert_eq!(dirs.lookup(0, b"abcd").unwrap(), Some(2));
    }

    #[test]
    fn long_names_are_bounded_to_field_width() {
        let pages = store();
        let dirs = DirStore::new(&pages);
        let long = [b'x'; 40];

        dirs.insert(0, &long, 3).unwrap();

        let (_, name, _) = dirs.iterate(0, 0).unwrap().next().unwrap();
        assert_eq!(name.len(), NAME_LEN - 1);
        assert_eq!(dirs.lookup(0, &long[..NAME_LEN - 1]).unwrap(), Some(3));
    }

    #[test]
    fn iteration_resumes_from_cursor() {
        let pages = store();
        let dirs = DirStore::new(&pages);
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            dirs.insert(0, name.as_bytes(), i as Ino + 1).unwrap();
        }
        dirs.remove(0, b"b").unwrap();

        let whole: Vec<_> = dirs.iterate(0, 0).unwrap().collect();
        assert_eq!(
            whole.iter().map(|(slot, _, _)| *slot).collect::<Vec<_>>(),
            vec![0, 2, 3]
        );

        let mut first = dirs.iterate(0, 0).unwrap();
        let head = first.next().unwrap();
        let cursor = first.position();
        assert_eq!(cursor, 1);

        let mut resumed = vec![head];
        resumed.extend(dirs.iterate(0, cursor).unwrap());
        assert_eq!(resumed, whole);

        let mut done = dirs.iterate(0, cursor).unwrap();
        done.by_ref().for_each(drop);
        assert_eq!(done.position(), DIR_ENTRY_COUNT);
    }

    #[test]
    fn removed_slots_are_reused() {
        let pages = store();
        let dirs = DirStore::new(&pages);
        dirs.insert(0, b"a", 1).unwrap();
        dirs.insert(0, b"b", 2).unwrap();

        assert_eq!(dirs.remove(0, b"a").unwrap(), 1);
        assert_eq!(dirs.remove(0, b"a"), Err(AFSError::DoesNotExist));
        assert_eq!(dirs.insert(0, b"c", 3).unwrap(), 0);
        assert_eq!(dirs.lookup(0, b"c").unwrap(), Some(3));
    }

    #[test]
    fn table_is_stored_in_the_directory_page() {
        let pages = store();
        let dirs = DirStore::new(&pages);
        dirs.insert(2, b"a", 7).unwrap();

        let raw = pages
            .read(2, DIR_DATA_PAGE, |page| page[..8].to_vec())
            .unwrap();
        assert_eq!(raw, 1u64.to_ne_bytes().to_vec());

        dirs.init(2).unwrap();
        assert_eq!(dirs.len(2).unwrap(), 0);
    }

    #[test]
    fn out_of_range_directory_is_invalid_argument() {
        let pages = store();
        let dirs = DirStore::new(&pages);

        assert!(matches!(
            dirs.insert(INODE_COUNT as Ino, b"a", 1),
            Err(AFSError::InvalidArgument(_))
        ));
        assert!(dirs.iterate(INODE_COUNT as Ino, 0).is_err());
    }
}
