use crate::fs::{AFSError, Ino};

use bitflags::bitflags;
use spin::Mutex;

/// Mask selecting the file type bits of a stored mode.
const S_IFMT: u16 = 0o170000;

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InodeType {
  Dir = 0o040000,
  File = 0o100000,
}

impl InodeType {
  /// Selects the inode type from the file type bits of a stored mode.
  pub fn from_mode(mode: u16) -> Option<Self> {
    match mode & S_IFMT {
      m if m == InodeType::Dir as u16 => Some(InodeType::Dir),
      m if m == InodeType::File as u16 => Some(InodeType::File),
      _ => None,
    }
  }

  pub fn is_directory(&self) -> bool {
    *self == InodeType::Dir
  }

  pub fn is_regular_file(&self) -> bool {
    *self == InodeType::File
  }
}

bitflags! {
  /// Permission bits kept alongside the file type. They are stored, never enforced.
  pub struct InodeMode: u16 {
    /// set-user-ID
    const S_ISUID = 0o4000;
    /// set-group-ID
    const S_ISGID = 0o2000;
    /// sticky bit
    const S_ISVTX = 0o1000;
    /// read by owner
    const S_IRUSR = 0o0400;
    /// write by owner
    const S_IWUSR = 0o0200;
    /// execute/search by owner
    const S_IXUSR = 0o0100;
    /// read by group
    const S_IRGRP = 0o0040;
    /// write by group
    const S_IWGRP = 0o0020;
    /// execute/search by group
    const S_IXGRP = 0o0010;
    /// read by others
    const S_IROTH = 0o0004;
    /// write by others
    const S_IWOTH = 0o0002;
    /// execute/search by others
    const S_IXOTH = 0o0001;
  }
}

impl InodeMode {
  /// rwxr-xr-x, the mode the root directory is formatted with.
  pub fn dir_default() -> Self {
    Self::S_IRUSR
      | Self::S_IWUSR
      | Self::S_IXUSR
      | Self::S_IRGRP
      | Self::S_IXGRP
      | Self::S_IROTH
      | Self::S_IXOTH
  }

  /// rw-r--r--
  pub fn file_default() -> Self {
    Self::S_IRUSR | Self::S_IWUSR | Self::S_IRGRP | Self::S_IROTH
  }

  /// Combines the permission bits with a file type into a stored mode.
  pub fn with_type(self, type_: InodeType) -> u16 {
    type_ as u16 | self.bits()
  }
}

/// The metadata record kept for every inode slot.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Inode {
  /// File type and permission bits (e.g drwxr-xr-x).
  pub mode: u16,
  /// The total size of the file in bytes.
  pub size: u64,
}

impl Inode {
  fn root() -> Self {
    Self {
      mode: InodeMode::dir_default().with_type(InodeType::Dir),
      size: 0,
    }
  }

  pub fn type_(&self) -> Option<InodeType> {
    InodeType::from_mode(self.mode)
  }

  pub fn perm(&self) -> InodeMode {
    InodeMode::from_bits_truncate(self.mode)
  }
}

/// Fixed table of inode records indexed by inode number.
///
/// Each record sits behind its own lock so a single read or write is never torn,
/// but sequences of calls on one record are the caller's to serialize.
pub struct InodeTable {
  nodes: Vec<Mutex<Inode>>,
}

impl InodeTable {
  pub fn new(count: usize) -> Self {
    let nodes = (0..count).map(|_| Mutex::new(Inode::default())).collect();
    Self { nodes }
  }

  /// Writes the root directory record into slot 0.
  pub fn format_root(&self, root: Ino) -> Result<(), AFSError> {
    *self.slot(root)?.lock() = Inode::root();
    Ok(())
  }

  pub fn read(&self, ino: Ino) -> Result<Inode, AFSError> {
    Ok(*self.slot(ino)?.lock())
  }

  pub fn write(&self, ino: Ino, mode: u16, size: u64) -> Result<(), AFSError> {
    *self.slot(ino)?.lock() = Inode { mode, size };
    Ok(())
  }

  /// Applies `f` to the record while holding its lock.
  pub fn update<V>(&self, ino: Ino, f: impl FnOnce(&mut Inode) -> V) -> Result<V, AFSError> {
    Ok(f(&mut self.slot(ino)?.lock()))
  }

  pub fn capacity(&self) -> usize {
    self.nodes.len()
  }

  fn slot(&self, ino: Ino) -> Result<&Mutex<Inode>, AFSError> {
    self
      .nodes
      .get(ino as usize)
      .ok_or_else(|| AFSError::InvalidArgument(format!("inode {} out of range", ino)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn formatted_root_is_a_directory() {
    let table = InodeTable::new(4);
    table.format_root(0).unwrap();

    let root = table.read(0).unwrap();
    assert_eq!(root.type_(), Some(InodeType::Dir));
    assert_eq!(root.size, 0);
    assert_eq!(root.mode, 0o040755);
  }

  #[test]
  fn can_write_and_read_back_records() {
    let table = InodeTable::new(4);
    let mode = InodeMode::file_default().with_type(InodeType::File);
    table.write(3, mode, 42).unwrap();

    let node = table.read(3).unwrap();
    assert_eq!(node, Inode { mode, size: 42 });
    assert_eq!(node.type_(), Some(InodeType::File));
    assert_eq!(node.perm(), InodeMode::file_default());
  }

  #[test]
  fn out_of_range_index_is_invalid_argument() {
    let table = InodeTable::new(4);

    assert!(matches!(table.read(4), Err(AFSError::InvalidArgument(_))));
    assert!(matches!(table.write(9, 0, 0), Err(AFSError::InvalidArgument(_))));
  }

  #[test]
  fn update_mutates_in_place() {
    let table = InodeTable::new(2);
    table.write(1, InodeType::File as u16, 10).unwrap();

    let grown = table
      .update(1, |node| {
        node.size = node.size.max(100);
        node.size
      })
      .unwrap();

    assert_eq!(grown, 100);
    assert_eq!(table.read(1).unwrap().size, 100);
  }

  #[test]
  fn unknown_file_type_bits_are_rejected() {
    assert_eq!(InodeType::from_mode(0o020644), None);
    assert_eq!(InodeType::from_mode(0), None);
    assert!(InodeType::from_mode(0o100644).unwrap().is_regular_file());
  }
}
