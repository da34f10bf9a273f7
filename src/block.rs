use std::{mem, ptr, ptr::NonNull};

use static_assertions::const_assert;

/// Size in bytes of the header stored in front of every payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

// Word-aligned payload sizes keep every carved header aligned.
const_assert!(mem::align_of::<Block>() <= mem::size_of::<usize>());
const_assert!(HEADER_SIZE % mem::align_of::<Block>() == 0);

/// The OS mapping a block was carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Mapping {
  pub base: NonNull<u8>,
  pub len: usize,
}

impl Mapping {
  fn end(&self) -> usize {
    self.base.as_ptr() as usize + self.len
  }
}

/// Header of one span of pool memory. The payload follows it directly.
#[repr(C)]
pub(crate) struct Block {
  pub size: usize,
  pub is_free: bool,
  pub next: *mut Block,
  pub mapping: Mapping,
}

impl Block {
  /// Writes a header covering the whole of `mapping`.
  ///
  /// # Safety
  ///
  /// `mapping` must be writable, aligned for `Block` and at least
  /// `HEADER_SIZE` bytes long.
  pub unsafe fn init(
    mapping: Mapping,
    is_free: bool,
  ) -> *mut Block {
    let block = mapping.base.as_ptr().cast::<Block>();
    let header = Block {
      size: mapping.len - HEADER_SIZE,
      is_free,
      next: ptr::null_mut(),
      mapping,
    };
    unsafe { block.write(header) };
    block
  }

  /// Recovers the header of a payload pointer handed out by the pool.
  ///
  /// # Safety
  ///
  /// `payload` must come from [`Block::payload`] on a block that is still mapped.
  pub unsafe fn from_payload(payload: NonNull<u8>) -> *mut Block {
    unsafe { payload.as_ptr().sub(HEADER_SIZE) }.cast()
  }

  /// # Safety
  ///
  /// `this` must point to a live header.
  pub unsafe fn payload(this: *mut Block) -> NonNull<u8> {
    // Non-null: a live header is never at address zero.
    unsafe { NonNull::new_unchecked(this.cast::<u8>().add(HEADER_SIZE)) }
  }

  /// # Safety
  ///
  /// `this` must point to a live header.
  pub unsafe fn end(this: *mut Block) -> *mut u8 {
    unsafe { Block::payload(this).as_ptr().add((*this).size) }
  }

  /// Whether the block covers its entire mapping and can be unmapped alone.
  ///
  /// # Safety
  ///
  /// `this` must point to a live header.
  pub unsafe fn spans_mapping(this: *mut Block) -> bool {
    unsafe {
      let mapping = (*this).mapping;
      this.cast::<u8>() == mapping.base.as_ptr() && Block::end(this) as usize == mapping.end()
    }
  }

  /// Shrinks the block to `size` bytes and turns the rest into a free block
  /// spliced in right after it. Nothing happens unless the slack can hold a
  /// header plus a non-empty payload.
  ///
  /// # Safety
  ///
  /// `this` must point to a live header and `size` must be word-aligned.
  pub unsafe fn split(
    this: *mut Block,
    size: usize,
  ) -> Option<*mut Block> {
    unsafe {
      let remaining = (*this).size.checked_sub(size)?.checked_sub(HEADER_SIZE)?;
      if remaining == 0 {
        return None;
      }

      let rest = Block::payload(this).as_ptr().add(size).cast::<Block>();
      rest.write(Block {
        size: remaining,
        is_free: true,
        next: (*this).next,
        mapping: (*this).mapping,
      });

      (*this).size = size;
      (*this).next = rest;

      Some(rest)
    }
  }

  /// Merges the direct successor into this block if it is free and
  /// physically follows it inside the same mapping. Returns the size the
  /// successor had.
  ///
  /// # Safety
  ///
  /// `this` and its successor, if any, must point to live headers.
  pub unsafe fn absorb_next(this: *mut Block) -> Option<usize> {
    unsafe {
      let next = (*this).next;
      if next.is_null() || !(*next).is_free {
        return None;
      }
      if (*next).mapping != (*this).mapping || Block::end(this) != next.cast::<u8>() {
        return None;
      }

      let absorbed = (*next).size;
      (*this).size += HEADER_SIZE + absorbed;
      (*this).next = (*next).next;

      Some(absorbed)
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{alloc::Layout, ptr::NonNull};

  use super::*;

  /// Heap-backed stand-in for an OS mapping, freed on drop.
  struct Region {
    layout: Layout,
    mapping: Mapping,
  }

  impl Region {
    fn new(len: usize) -> Self {
      let layout = Layout::from_size_align(len, mem::align_of::<Block>()).unwrap();
      let base = NonNull::new(unsafe { std::alloc::alloc(layout) }).unwrap();
      Self {
        layout,
        mapping: Mapping { base, len },
      }
    }
  }

  impl Drop for Region {
    fn drop(&mut self) {
      unsafe { std::alloc::dealloc(self.mapping.base.as_ptr(), self.layout) };
    }
  }

  #[test]
  fn test_payload_round_trip() {
    let region = Region::new(HEADER_SIZE + 64);

    unsafe {
      let block = Block::init(region.mapping, true);
      assert_eq!((*block).size, 64);

      let payload = Block::payload(block);
      assert_eq!(payload.as_ptr() as usize - block as usize, HEADER_SIZE);
      assert_eq!(Block::from_payload(payload), block);
      assert!(Block::spans_mapping(block));
    }
  }

  #[test]
  fn test_split_carves_free_remainder() {
    let region = Region::new(HEADER_SIZE + 256);

    unsafe {
      let block = Block::init(region.mapping, true);
      let rest = Block::split(block, 64).unwrap();

      assert_eq!((*block).size, 64);
      assert_eq!((*block).next, rest);
      assert_eq!(rest.cast::<u8>(), Block::end(block));
      assert_eq!((*rest).size, 256 - 64 - HEADER_SIZE);
      assert!((*rest).is_free);
      assert!((*rest).next.is_null());
      assert_eq!((*rest).mapping, region.mapping);
      assert!(!Block::spans_mapping(block));
      assert!(!Block::spans_mapping(rest));
    }
  }

  #[test]
  fn test_split_needs_room_for_a_header() {
    let region = Region::new(HEADER_SIZE + 128);

    unsafe {
      let block = Block::init(region.mapping, true);

      assert!(Block::split(block, 128 - HEADER_SIZE).is_none());
      assert!(Block::split(block, 128).is_none());
      assert_eq!((*block).size, 128);
      assert!((*block).next.is_null());
    }
  }

  #[test]
  fn test_absorb_restores_whole_mapping() {
    let region = Region::new(HEADER_SIZE + 256);

    unsafe {
      let block = Block::init(region.mapping, false);
      let rest = Block::split(block, 64).unwrap();

      (*rest).is_free = false;
      assert_eq!(Block::absorb_next(block), None);

      (*rest).is_free = true;
      assert_eq!(Block::absorb_next(block), Some(256 - 64 - HEADER_SIZE));
      assert_eq!((*block).size, 256);
      assert!((*block).next.is_null());
      assert!(Block::spans_mapping(block));
    }
  }

  #[test]
  fn test_absorb_skips_other_mappings() {
    let first = Region::new(HEADER_SIZE + 64);
    let second = Region::new(HEADER_SIZE + 64);

    unsafe {
      let block = Block::init(first.mapping, true);
      let other = Block::init(second.mapping, true);
      (*block).next = other;

      assert_eq!(Block::absorb_next(block), None);
      assert_eq!((*block).size, 64);
      assert_eq!((*block).next, other);
    }
  }
}
