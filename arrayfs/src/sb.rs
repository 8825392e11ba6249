const SB_MAGIC: u32 = 0x4152_4653;

/// Describes the fixed geometry of the file system and how much of it is in use,
/// the information a statfs call reports.
///
/// Every file owns the same number of pages whether it uses them or not, so the
/// number of free inodes is the only capacity that changes at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperBlock {
    /// A 32-bit identifying string, in this case ARFS.
    pub sb_magic: u32,
    /// The number of inode slots. This sets the upper bound on how many files
    /// and directories can exist, the root included.
    pub inodes_count: u32,
    /// The number of remaining available inodes.
    pub free_inodes_count: u32,
    /// Pages backing every file.
    pub pages_per_file: u32,
    /// Bytes in one page.
    pub page_size: u32,
    /// The longest name a directory entry can hold.
    pub name_max: u32,
}

impl SuperBlock {
    pub fn new() -> Self {
        Self {
            sb_magic: SB_MAGIC, // ARFS
            inodes_count: 0,
            free_inodes_count: 0,
            pages_per_file: 0,
            page_size: 0,
            name_max: 0,
        }
    }

    /// The largest size a single file can grow to.
    pub fn max_file_size(&self) -> u64 {
        self.pages_per_file as u64 * self.page_size as u64
    }

    pub fn used_inodes_count(&self) -> u32 {
        self.inodes_count - self.free_inodes_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_matches_fixed_sizing() {
        let sb = SuperBlock::default();

        assert_eq!(sb.sb_magic, SB_MAGIC);
        assert_eq!(sb.inodes_count, 32);
        assert_eq!(sb.free_inodes_count, 32);
        assert_eq!(sb.max_file_size(), 8 * 4096);
        assert_eq!(sb.used_inodes_count(), 0);
    }

    #[test]
    fn new_super_block_is_empty() {
        let sb = SuperBlock::new();
        assert_eq!(sb.max_file_size(), 0);
        assert_eq!(sb.name_max, 0);
    }
}
