use std::path::{Component, Path};

use crate::dir::DirIter;
use crate::fs::{AFSError, Ino, Mount, AFS, NAME_LEN, PAGES_PER_FILE, PAGE_SIZE};
use crate::io::{PageIndex, PageStorage};
use crate::node::{Inode, InodeMode, InodeType};

/// The largest size a file can reach.
const MAX_FILE_SIZE: u64 = (PAGES_PER_FILE * PAGE_SIZE) as u64;

// Encodes how `Mount::open` treats a missing final path component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpenMode {
    /// The path must already exist.
    ReadOnly,
    /// Create a regular file if the path does not exist.
    Create,
    /// Create a directory if the path does not exist.
    Directory,
}

/// An inode handle, typed by the file type stored in its mode.
pub enum Node<'a> {
    Directory(Dir<'a>),
    File(File<'a>),
}

impl<'a> Node<'a> {
    /// Reads the stored mode of `ino` once and picks the matching handle.
    pub(crate) fn materialize(fs: &'a AFS, ino: Ino) -> Result<Self, AFSError> {
        let node = fs.inodes.read(ino)?;
        match node.type_() {
            Some(InodeType::Dir) => Ok(Node::Directory(Dir::new(fs, ino))),
            Some(InodeType::File) => Ok(Node::File(File::new(fs, ino))),
            None => Err(AFSError::InvalidArgument(format!(
                "inode {} has unsupported mode {:o}",
                ino, node.mode
            ))),
        }
    }

    pub fn ino(&self) -> Ino {
        match self {
            Node::Directory(dir) => dir.ino,
            Node::File(file) => file.ino,
        }
    }

    pub fn type_(&self) -> InodeType {
        match self {
            Node::Directory(_) => InodeType::Dir,
            Node::File(_) => InodeType::File,
        }
    }

    pub fn into_dir(self) -> Result<Dir<'a>, AFSError> {
        match self {
            Node::Directory(dir) => Ok(dir),
            Node::File(_) => Err(AFSError::NotADirectory),
        }
    }

    pub fn into_file(self) -> Result<File<'a>, AFSError> {
        match self {
            Node::File(file) => Ok(file),
            Node::Directory(_) => Err(AFSError::IsADirectory),
        }
    }
}

/// A directory handle.
pub struct Dir<'a> {
    fs: &'a AFS,
    ino: Ino,
}

impl<'a> Dir<'a> {
    pub(crate) fn new(fs: &'a AFS, ino: Ino) -> Self {
        Self { fs, ino }
    }

    pub fn ino(&self) -> Ino {
        self.ino
    }

    pub fn metadata(&self) -> Result<Inode, AFSError> {
        self.fs.inodes.read(self.ino)
    }

    /// Finds `name` in this directory. A miss is `DoesNotExist`.
    pub fn lookup(&self, name: &str) -> Result<Node<'a>, AFSError> {
        let name = check_name(name)?;
        let child = self
            .fs
            .dirs()
            .lookup(self.ino, name)?
            .ok_or(AFSError::DoesNotExist)?;
        Node::materialize(self.fs, child)
    }

    /// Creates an empty regular file called `name`.
    pub fn create(&self, name: &str, perm: InodeMode) -> Result<File<'a>, AFSError> {
        let ino = self.make_node(name, InodeType::File, perm)?;
        Ok(File::new(self.fs, ino))
    }

    /// Creates an empty directory called `name`.
    pub fn mkdir(&self, name: &str, perm: InodeMode) -> Result<Dir<'a>, AFSError> {
        let ino = self.make_node(name, InodeType::Dir, perm)?;
        Ok(Dir::new(self.fs, ino))
    }

    /// Removes the regular file called `name` and frees its inode.
    pub fn unlink(&self, name: &str) -> Result<(), AFSError> {
        self.remove(name, InodeType::File)
    }

    /// Removes the empty directory called `name` and frees its inode.
    pub fn rmdir(&self, name: &str) -> Result<(), AFSError> {
        self.remove(name, InodeType::Dir)
    }

    /// The number of entries in this directory.
    pub fn len(&self) -> Result<usize, AFSError> {
        self.fs.dirs().len(self.ino)
    }

    pub fn is_empty(&self) -> Result<bool, AFSError> {
        Ok(self.len()? == 0)
    }

    pub fn read_dir(&self) -> Result<ReadDir<'a>, AFSError> {
        self.read_dir_from(0)
    }

    /// Lists entries starting at the cursor `pos`, as returned by
    /// `ReadDir::position`.
    pub fn read_dir_from(&self, pos: usize) -> Result<ReadDir<'a>, AFSError> {
        self.ensure_dir()?;
        Ok(ReadDir {
            fs: self.fs,
            inner: self.fs.dirs().iterate(self.ino, pos)?,
        })
    }

    /// Allocates and publishes a new inode under `name`. The entry slot, the
    /// duplicate check and the inode allocation all happen under the directory
    /// lock; nothing is committed unless every step succeeds.
    fn make_node(&self, name: &str, type_: InodeType, perm: InodeMode) -> Result<Ino, AFSError> {
        let name = check_name(name)?;
        self.ensure_dir()?;

        let fs = self.fs;
        let dir = self.ino;
        fs.dirs().modify(dir, |data| -> Result<Ino, AFSError> {
            // rmdir may have emptied this directory while we waited for the lock.
            self.ensure_dir()?;
            if data.find(name).is_some() {
                return Err(AFSError::AlreadyExists);
            }
            if data.is_full() {
                warn!("not enough space for dir, ino={}", dir);
                return Err(AFSError::NoSpace);
            }

            let ino = fs.allocator.allocate()?;
            if let Err(err) = self.init_node(ino, type_, perm) {
                fs.inodes.write(ino, 0, 0)?;
                fs.allocator.free(ino)?;
                return Err(err);
            }
            data.insert(name, ino).ok_or(AFSError::NoSpace)?;

            debug!("create {:?}, dir={}, ino={}", type_, dir, ino);
            Ok(ino)
        })?
    }

    /// Writes the record of a just-allocated inode. Pages of a freed inode can
    /// still be written through the page store, so a directory gets its table
    /// reset rather than trusting it to be zeroed.
    fn init_node(&self, ino: Ino, type_: InodeType, perm: InodeMode) -> Result<(), AFSError> {
        self.fs.inodes.write(ino, perm.with_type(type_), 0)?;
        if type_.is_directory() {
            self.fs.dirs().init(ino)?;
        }
        Ok(())
    }

    fn remove(&self, name: &str, type_: InodeType) -> Result<(), AFSError> {
        let name = check_name(name)?;
        self.ensure_dir()?;

        let fs = self.fs;
        let child = fs.dirs().modify(self.ino, |data| -> Result<Ino, AFSError> {
            let (slot, entry) = data.find(name).ok_or(AFSError::DoesNotExist)?;
            let child = entry.ino();
            if child == self.ino {
                return Err(AFSError::InvalidArgument(format!(
                    "entry {:?} refers to its own directory",
                    String::from_utf8_lossy(name)
                )));
            }

            match (type_, fs.inodes.read(child)?.type_()) {
                (InodeType::File, Some(InodeType::Dir)) => return Err(AFSError::IsADirectory),
                (InodeType::Dir, Some(InodeType::File)) => return Err(AFSError::NotADirectory),
                _ => {}
            }
            if type_.is_directory() {
                // Retire the record while the child's table is locked, so a
                // create that was waiting on it sees a dead directory.
                fs.dirs().modify(child, |table| -> Result<(), AFSError> {
                    if !table.is_empty() {
                        return Err(AFSError::DirectoryNotEmpty);
                    }
                    fs.inodes.write(child, 0, 0)
                })??;
            }

            data.remove_slot(slot);
            Ok(child)
        })??;

        fs.release_inode(child)?;
        debug!("remove {:?}, dir={}, ino={}", type_, self.ino, child);
        Ok(())
    }

    /// Guards against handles to directories that have since been removed.
    fn ensure_dir(&self) -> Result<(), AFSError> {
        if !self.fs.allocator.is_allocated(self.ino) {
            return Err(AFSError::DoesNotExist);
        }
        match self.metadata()?.type_() {
            Some(InodeType::Dir) => Ok(()),
            Some(InodeType::File) => Err(AFSError::NotADirectory),
            // Retired by rmdir but not yet freed.
            None => Err(AFSError::DoesNotExist),
        }
    }
}

/// One directory entry as listed by `ReadDir`.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    /// Slot the entry occupies. Resume a listing from `pos + 1`.
    pub pos: usize,
    pub name: String,
    pub ino: Ino,
    pub type_: InodeType,
}

/// Lazily lists a directory. Entries added or removed during the walk may or
/// may not show up.
pub struct ReadDir<'a> {
    fs: &'a AFS,
    inner: DirIter<'a>,
}

impl<'a> ReadDir<'a> {
    /// The cursor to hand to `Dir::read_dir_from` to continue this listing.
    pub fn position(&self) -> usize {
        self.inner.position()
    }
}

impl<'a> Iterator for ReadDir<'a> {
    type Item = DirEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let (pos, name, ino) = self.inner.next()?;
        let node = match self.fs.inodes.read(ino) {
            Ok(node) => node,
            Err(_) => {
                warn!("dir entry points past the inode table, ino={}", ino);
                // Stay on the bad slot so the listing stays finished.
                self.inner.seek(pos);
                return None;
            }
        };
        let type_ = match node.type_() {
            Some(InodeType::File) => InodeType::File,
            _ => InodeType::Dir,
        };
        Some(DirEntry {
            pos,
            name: String::from_utf8_lossy(&name).into_owned(),
            ino,
            type_,
        })
    }
}

/// A regular file handle.
pub struct File<'a> {
    fs: &'a AFS,
    ino: Ino,
}

impl<'a> File<'a> {
    pub(crate) fn new(fs: &'a AFS, ino: Ino) -> Self {
        Self { fs, ino }
    }

    pub fn ino(&self) -> Ino {
        self.ino
    }

    pub fn metadata(&self) -> Result<Inode, AFSError> {
        self.fs.inodes.read(self.ino)
    }

    pub fn size(&self) -> Result<u64, AFSError> {
        Ok(self.metadata()?.size)
    }

    /// Reads a whole page, bypassing the file size. See `PageStorage::read_page`.
    pub fn read_page(&self, index: PageIndex, buf: &mut [u8]) -> usize {
        self.fs.pages.read_page(self.ino, index, buf)
    }

    /// Writes a whole page without touching the file size. See
    /// `PageStorage::write_page`.
    pub fn write_page(&self, index: PageIndex, buf: &[u8]) -> usize {
        self.fs.pages.write_page(self.ino, index, buf)
    }

    /// Reads from `offset` up to the end of the file and returns the number of
    /// bytes read, which is 0 at or past the end.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, AFSError> {
        let size = self.size()?;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let end = size.min(offset + buf.len() as u64);

        let mut pos = offset;
        while pos < end {
            let (index, start, len) = page_span(pos, end);
            let done = (pos - offset) as usize;
            let out = &mut buf[done..done + len];
            self.fs
                .pages
                .read(self.ino, index, |page| out.copy_from_slice(&page[start..start + len]))
                .ok_or_else(|| AFSError::InvalidArgument(format!("page {} out of range", index)))?;
            pos += len as u64;
        }
        Ok((end - offset) as usize)
    }

    /// Writes `data` at `offset`, growing the file if the write ends past its
    /// current size. A write reaching past the last page is cut short; the
    /// number of bytes written is returned.
    ///
    /// # Errors
    ///
    /// Returns `FileTooLarge` if `offset` is at or past the maximum file size.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize, AFSError> {
        if data.is_empty() {
            return Ok(0);
        }
        if offset >= MAX_FILE_SIZE {
            return Err(AFSError::FileTooLarge);
        }
        let end = MAX_FILE_SIZE.min(offset + data.len() as u64);

        let mut pos = offset;
        while pos < end {
            let (index, start, len) = page_span(pos, end);
            let done = (pos - offset) as usize;
            let src = &data[done..done + len];
            self.fs
                .pages
                .modify(self.ino, index, |page| page[start..start + len].copy_from_slice(src))
                .ok_or_else(|| AFSError::InvalidArgument(format!("page {} out of range", index)))?;
            pos += len as u64;
        }

        self.fs.inodes.update(self.ino, |node| node.size = node.size.max(end))?;
        Ok((end - offset) as usize)
    }
}

/// Splits the byte range starting at `pos` into the page holding `pos`, the
/// offset within that page and the bytes to take from it before `end`.
fn page_span(pos: u64, end: u64) -> (PageIndex, usize, usize) {
    let index = (pos / PAGE_SIZE as u64) as PageIndex;
    let start = (pos % PAGE_SIZE as u64) as usize;
    let len = ((PAGE_SIZE - start) as u64).min(end - pos) as usize;
    (index, start, len)
}

/// Validates a single path component for use as a directory entry name.
fn check_name(name: &str) -> Result<&[u8], AFSError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(AFSError::InvalidArgument(format!(
            "invalid file name {:?}",
            name
        )));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(AFSError::InvalidArgument(format!(
            "file name {:?} contains a reserved character",
            name
        )));
    }
    if name.len() >= NAME_LEN {
        return Err(AFSError::NameTooLong);
    }
    Ok(name.as_bytes())
}

impl<'a> Mount<'a> {
    /// Resolves an absolute path one directory lookup per component. By default a
    /// missing path is an error; set `OpenMode` to create a file or directory for
    /// the final component instead.
    pub fn open<P: AsRef<Path>>(&self, path: P, mode: OpenMode) -> Result<Node<'_>, AFSError> {
        let mut parts = path.as_ref().components().peekable();
        if Some(Component::RootDir) != parts.next() {
            return Err(AFSError::InvalidArgument(
                "path must start with \"/\"".to_string(),
            ));
        }

        let mut node = Node::Directory(self.root());
        while let Some(part) = parts.next() {
            let name = match part {
                Component::Normal(name) => name.to_str().ok_or_else(|| {
                    AFSError::InvalidArgument("path is not valid UTF-8".to_string())
                })?,
                Component::CurDir => continue,
                _ => {
                    return Err(AFSError::InvalidArgument(
                        "path may not contain \"..\"".to_string(),
                    ))
                }
            };
            let dir = node.into_dir()?;
            let last = parts.peek().is_none();

            node = match dir.lookup(name) {
                Err(AFSError::DoesNotExist) if last => match mode {
                    OpenMode::ReadOnly => return Err(AFSError::DoesNotExist),
                    OpenMode::Create => create_or_lookup(&dir, name, || {
                        dir.create(name, InodeMode::file_default()).map(Node::File)
                    })?,
                    OpenMode::Directory => create_or_lookup(&dir, name, || {
                        dir.mkdir(name, InodeMode::dir_default()).map(Node::Directory)
                    })?,
                },
                found => found?,
            };
        }
        if mode == OpenMode::Directory {
            return node.into_dir().map(Node::Directory);
        }
        Ok(node)
    }
}

/// Losing a creation race to another caller still opens what they created.
fn create_or_lookup<'a>(
    dir: &Dir<'a>,
    name: &str,
    create: impl FnOnce() -> Result<Node<'a>, AFSError>,
) -> Result<Node<'a>, AFSError> {
    match create() {
        Err(AFSError::AlreadyExists) => dir.lookup(name),
        created => created,
    }
}
