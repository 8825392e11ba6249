use crate::alloc::InodeAllocator;
use crate::dir::DirStore;
use crate::io::{PageStorage, PageStore};
use crate::node::InodeTable;
use crate::sb::SuperBlock;
use crate::vfs::{Dir, Node};

use spin::Mutex;
use thiserror::Error;

const SB_MAGIC: u32 = 0x4152_4653; // ARFS

/// The number of inode slots, and so the upper bound on files and directories.
pub const INODE_COUNT: usize = 32;
/// Every file owns exactly this many pages, which caps the file size.
pub const PAGES_PER_FILE: usize = 8;
pub const PAGE_SIZE: usize = 4096;
/// Entry slots in one directory table.
pub const DIR_ENTRY_COUNT: usize = 64;
/// Width of the name field, terminator included.
pub const NAME_LEN: usize = 32;
pub const ROOT_INO: Ino = 0;

const _: () = assert!(INODE_COUNT <= crate::alloc::Bitmap::BITS);

/// Inode numbers index the inode table and the page store.
pub type Ino = u32;

impl Default for SuperBlock {
    fn default() -> Self {
        let mut sb = SuperBlock::new();
        sb.sb_magic = SB_MAGIC;
        sb.inodes_count = INODE_COUNT as u32;
        sb.pages_per_file = PAGES_PER_FILE as u32;
        sb.page_size = PAGE_SIZE as u32;
        sb.name_max = (NAME_LEN - 1) as u32;
        // All inodes are initially free.
        sb.free_inodes_count = sb.inodes_count;
        sb
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AFSError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no space left on device")]
    NoSpace,
    #[error("file system is already mounted")]
    Busy,
    #[error("found no file at path")]
    DoesNotExist,
    #[error("file exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("file name too long")]
    NameTooLong,
    #[error("file too large")]
    FileTooLarge,
}

/// A fixed size file system held entirely in memory: `INODE_COUNT` inodes each
/// owning `PAGES_PER_FILE` pages of `PAGE_SIZE` bytes. Directories keep their
/// entry table in their first page.
///
/// The storage is shared by every mount of the instance and survives unmount.
/// Only one mount may be active at a time.
pub struct AFS {
    mounted: Mutex<bool>,
    pub(crate) allocator: InodeAllocator,
    pub(crate) inodes: InodeTable,
    pub(crate) pages: PageStore,
}

impl AFS {
    /// Builds zeroed storage holding only the root directory.
    ///
    /// # Layout
    /// =====================================================================
    /// | Inode bitmap | Inode records [N] | Pages [N][P] (page 0 of a dir is its table) |
    /// =====================================================================
    pub fn format() -> Result<Self, AFSError> {
        let fs = AFS {
            mounted: Mutex::new(false),
            allocator: InodeAllocator::new(INODE_COUNT),
            inodes: InodeTable::new(INODE_COUNT),
            pages: PageStore::new(INODE_COUNT, PAGES_PER_FILE),
        };

        // Initialize inode structure with root node.
        fs.allocator.reserve(ROOT_INO)?;
        fs.inodes.format_root(ROOT_INO)?;
        fs.dirs().init(ROOT_INO)?;

        info!(
            "formatted arrayfs, inodes={}, pages_per_file={}",
            INODE_COUNT, PAGES_PER_FILE
        );
        Ok(fs)
    }

    /// Makes the storage reachable through its root directory.
    ///
    /// # Errors
    ///
    /// Returns `Busy` while another mount is alive. A root inode that cannot be
    /// materialized as a directory fails the mount and leaves it unmounted.
    pub fn mount(&self) -> Result<Mount<'_>, AFSError> {
        {
            let mut mounted = self.mounted.lock();
            if *mounted {
                error!("arrayfs already mounted");
                return Err(AFSError::Busy);
            }
            *mounted = true;
        }
        // From here on dropping the handle rolls the flag back.
        let mount = Mount { fs: self };

        match mount.iget(ROOT_INO) {
            Ok(Node::Directory(_)) => {}
            Ok(Node::File(_)) => {
                error!("can't get root inode, ino={} is not a directory", ROOT_INO);
                return Err(AFSError::NotADirectory);
            }
            Err(err) => {
                error!("can't get root inode: {}", err);
                return Err(err);
            }
        }

        info!("mount arrayfs succeeded");
        Ok(mount)
    }

    pub fn is_mounted(&self) -> bool {
        *self.mounted.lock()
    }

    pub fn super_block(&self) -> SuperBlock {
        let mut sb = SuperBlock::default();
        sb.free_inodes_count = self.allocator.free_count() as u32;
        sb
    }

    pub(crate) fn dirs(&self) -> DirStore<'_> {
        DirStore::new(&self.pages)
    }

    /// Returns an inode to the free pool. Its pages and record are cleared before
    /// the slot is released so the next owner starts from zero.
    pub(crate) fn release_inode(&self, ino: Ino) -> Result<(), AFSError> {
        self.pages.clear_file(ino);
        self.inodes.write(ino, 0, 0)?;
        self.allocator.free(ino)
    }

    fn unmount(&self) {
        *self.mounted.lock() = false;
    }
}

/// The one active mount of an `AFS`. Every file operation goes through a handle
/// borrowed from it; dropping it unmounts.
pub struct Mount<'a> {
    fs: &'a AFS,
}

impl<'a> Mount<'a> {
    pub fn root(&self) -> Dir<'_> {
        Dir::new(self.fs, ROOT_INO)
    }

    /// Materializes the handle matching the stored type of `ino`.
    pub fn iget(&self, ino: Ino) -> Result<Node<'_>, AFSError> {
        if ino as usize >= INODE_COUNT {
            return Err(AFSError::InvalidArgument(format!(
                "inode {} out of range",
                ino
            )));
        }
        if !self.fs.allocator.is_allocated(ino) {
            return Err(AFSError::DoesNotExist);
        }
        Node::materialize(self.fs, ino)
    }

    pub fn super_block(&self) -> SuperBlock {
        self.fs.super_block()
    }

    pub fn allocator(&self) -> &InodeAllocator {
        &self.fs.allocator
    }

    pub fn inode_table(&self) -> &InodeTable {
        &self.fs.inodes
    }

    pub fn dir_store(&self) -> DirStore<'_> {
        self.fs.dirs()
    }

    pub fn page_store(&self) -> &dyn PageStorage {
        &self.fs.pages
    }

    pub fn unmount(self) {
        drop(self);
    }
}

impl Drop for Mount<'_> {
    fn drop(&mut self) {
        self.fs.unmount();
        info!("unmount arrayfs");
    }
}
