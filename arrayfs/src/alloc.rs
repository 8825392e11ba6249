use crate::fs::{AFSError, Ino};
use spin::Mutex;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

#[repr(transparent)]
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug, Default, PartialEq)]
pub struct Bitmap {
    /// A single word tracks up to 64 slots, enough for both the inode table and
    /// a directory's entry table.
    bits: u64,
}

impl Bitmap {
    pub const BITS: usize = 64;

    pub fn new() -> Self {
        Self { bits: 0 }
    }

    pub fn get(&self, nr: usize) -> State {
        assert!(nr < Self::BITS);
        match (self.bits >> nr) & 0b01 {
            0 => State::Free,
            1 => State::Used,
            _ => unreachable!("Slot state returned a non 0 or 1 value. This likely indicates an error with bitmasking"),
        }
    }

    pub fn set_reserved(&mut self, nr: usize) {
        assert!(nr < Self::BITS);
        self.bits |= 0b01_u64 << nr;
    }

    pub fn set_free(&mut self, nr: usize) {
        assert!(nr < Self::BITS);
        self.bits &= !(0b01_u64 << nr);
    }

    /// Returns the lowest free slot below `cap`.
    pub fn first_free(&self, cap: usize) -> Option<usize> {
        let nr = (!self.bits).trailing_zeros() as usize;
        if nr < cap.min(Self::BITS) {
            Some(nr)
        } else {
            None
        }
    }

    /// Returns the lowest used slot in `from..cap`.
    pub fn next_used(&self, from: usize, cap: usize) -> Option<usize> {
        let cap = cap.min(Self::BITS);
        if from >= cap {
            return None;
        }
        let nr = (self.bits >> from).trailing_zeros() as usize + from;
        if nr < cap {
            Some(nr)
        } else {
            None
        }
    }

    pub fn count_used(&self, cap: usize) -> usize {
        self.used(0, cap).count()
    }

    /// Iterates used slots in ascending order starting at `from`.
    pub fn used(&self, from: usize, cap: usize) -> UsedSlots {
        UsedSlots {
            bitmap: *self,
            marker: from,
            cap,
        }
    }
}

/// Walks the used slots of a bitmap snapshot. The marker is the next slot to
/// inspect, so an interrupted walk can be resumed from it.
pub struct UsedSlots {
    bitmap: Bitmap,
    marker: usize,
    cap: usize,
}

impl Iterator for UsedSlots {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let nr = self.bitmap.next_used(self.marker, self.cap)?;
        self.marker = nr + 1;
        Some(nr)
    }
}

/// Hands out inode numbers from a fixed index space. The scan for a free slot
/// and the claim of that slot happen under one lock, so concurrent callers
/// never receive the same number.
pub struct InodeAllocator {
    bitmap: Mutex<Bitmap>,
    /// The number of allocatable inodes, at most `Bitmap::BITS`.
    cap: usize,
}

impl InodeAllocator {
    pub fn new(cap: usize) -> Self {
        assert!(cap <= Bitmap::BITS, "allocator capacity exceeds bitmap width");
        Self {
            bitmap: Mutex::new(Bitmap::new()),
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn allocate(&self) -> Result<Ino, AFSError> {
        let mut bitmap = self.bitmap.lock();
        let ino = bitmap.first_free(self.cap).ok_or(AFSError::NoSpace)?;
        bitmap.set_reserved(ino);
        drop(bitmap);

        debug!("allocate new inode, ino={}", ino);
        Ok(ino as Ino)
    }

    /// Marks a specific inode as used. Returns false if it was already taken.
    pub fn reserve(&self, ino: Ino) -> Result<bool, AFSError> {
        let nr = self.check(ino)?;
        let mut bitmap = self.bitmap.lock();
        if bitmap.get(nr) == State::Used {
            return Ok(false);
        }
        bitmap.set_reserved(nr);
        Ok(true)
    }

    pub fn free(&self, ino: Ino) -> Result<(), AFSError> {
        let nr = self.check(ino)?;
        self.bitmap.lock().set_free(nr);
        debug!("free inode, ino={}", ino);
        Ok(())
    }

    pub fn is_allocated(&self, ino: Ino) -> bool {
        match self.check(ino) {
            Ok(nr) => self.bitmap.lock().get(nr) == State::Used,
            Err(_) => false,
        }
    }

    pub fn free_count(&self) -> usize {
        self.cap - self.bitmap.lock().count_used(self.cap)
    }

    fn check(&self, ino: Ino) -> Result<usize, AFSError> {
        let nr = ino as usize;
        if nr >= self.cap {
            return Err(AFSError::InvalidArgument(format!(
                "inode {} out of range",
                ino
            )));
        }
        Ok(nr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(2);

        assert_eq!(bmp.get(0), State::Free);
        assert_eq!(bmp.get(2), State::Used);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(0);
        bmp.set_reserved(63);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(63), State::Used);
        assert_eq!(bmp.get(62), State::Free);
    }

    #[test]
    fn can_toggle_slot_between_free_and_used() {
        let mut bmp = Bitmap::new();

        bmp.set_reserved(10);
        bmp.set_reserved(11);
        assert_eq!(bmp.get(10), State::Used);

        bmp.set_free(10);
        assert_eq!(bmp.get(10), State::Free);
        // Neighbours are untouched.
        assert_eq!(bmp.get(11), State::Used);
    }

    #[test]
    fn first_free_respects_capacity() {
        let mut bmp = Bitmap::new();
        for i in 0..4 {
            bmp.set_reserved(i);
        }

        assert_eq!(bmp.first_free(8), Some(4));
        assert_eq!(bmp.first_free(4), None);

        let mut full = Bitmap::new();
        for i in 0..64 {
            full.set_reserved(i);
        }
        assert_eq!(full.first_free(64), None);
    }

    #[test]
    fn used_slots_skip_gaps_and_resume() {
        let mut bmp = Bitmap::new();
        bmp.set_reserved(1);
        bmp.set_reserved(5);
        bmp.set_reserved(40);

        assert_eq!(bmp.used(0, 64).collect::<Vec<_>>(), vec![1, 5, 40]);
        assert_eq!(bmp.used(2, 64).collect::<Vec<_>>(), vec![5, 40]);
        assert_eq!(bmp.used(0, 40).collect::<Vec<_>>(), vec![1, 5]);
        assert_eq!(bmp.next_used(41, 64), None);
        assert_eq!(bmp.next_used(64, 64), None);
        assert_eq!(bmp.count_used(64), 3);
    }

    #[test]
    fn allocator_hands_out_lowest_free_inode() {
        let allocator = InodeAllocator::new(4);
        assert_eq!(allocator.reserve(0).unwrap(), true);
        assert_eq!(allocator.reserve(0).unwrap(), false);

        assert_eq!(allocator.allocate().unwrap(), 1);
        assert_eq!(allocator.allocate().unwrap(), 2);
        allocator.free(1).unwrap();
        assert_eq!(allocator.allocate().unwrap(), 1);
        assert_eq!(allocator.free_count(), 1);
    }

    #[test]
    fn allocator_reports_no_space_when_full() {
        let allocator = InodeAllocator::new(2);
        allocator.allocate().unwrap();
        allocator.allocate().unwrap();

        assert_eq!(allocator.allocate(), Err(AFSError::NoSpace));
        assert_eq!(allocator.free_count(), 0);
    }

    #[test]
    fn allocator_rejects_out_of_range_inodes() {
        let allocator = InodeAllocator::new(8);

        assert!(matches!(
            allocator.free(8),
            Err(AFSError::InvalidArgument(_))
        ));
        assert!(!allocator.is_allocated(100));
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        const CAP: usize = 32;
        let allocator = Arc::new(InodeAllocator::new(CAP));

        let handles: Vec<_> = (0..CAP)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || allocator.allocate().unwrap())
            })
            .collect();
        let inos: HashSet<Ino> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(inos.len(), CAP);
        assert!(inos.iter().all(|&ino| (ino as usize) < CAP));
        assert_eq!(allocator.allocate(), Err(AFSError::NoSpace));
    }
}
