#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod alloc;
mod dir;
mod fs;
pub mod io;
mod node;
mod sb;
mod vfs;

pub use crate::alloc::{Bitmap, InodeAllocator, State};
pub use crate::dir::{DirData, DirIter, DirStore, RawDirEntry, DIR_DATA_PAGE};
pub use crate::fs::{
    AFSError, Ino, Mount, AFS, DIR_ENTRY_COUNT, INODE_COUNT, NAME_LEN, PAGES_PER_FILE, PAGE_SIZE,
    ROOT_INO,
};
pub use crate::node::{Inode, InodeMode, InodeTable, InodeType};
pub use crate::sb::SuperBlock;
pub use crate::vfs::{Dir, DirEntry, File, Node, OpenMode, ReadDir};

lazy_static! {
    /// The process-wide file system. Its storage is formatted once, on first use,
    /// and lives until the process exits.
    static ref ARRAYFS: Result<AFS, AFSError> = AFS::format();
}

/// Formats the process-wide file system if that has not happened yet. Calling it
/// at startup keeps formatting out of the first mount.
pub fn init() -> Result<(), AFSError> {
    global().map(|_| ())
}

/// Mounts the process-wide file system.
///
/// # Errors
///
/// Returns `Busy` while a previous mount is still alive.
pub fn mount() -> Result<Mount<'static>, AFSError> {
    global()?.mount()
}

/// The process-wide file system, for callers that manage mounts themselves.
pub fn global() -> Result<&'static AFS, AFSError> {
    ARRAYFS.as_ref().map_err(Clone::clone)
}
