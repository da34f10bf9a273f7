use std::{
  alloc::{Layout, handle_alloc_error},
  mem,
  ptr::{self, NonNull},
};

use crate::{
  align::checked_align,
  block::{Block, HEADER_SIZE},
  error::PoolError,
  os::{Mmap, PageSource},
};

/// First-fit free-list allocator over OS-mapped regions.
///
/// Every block of the pool, free or allocated, sits on one singly linked
/// chain in the order it was created. Allocation takes the first free block
/// that is large enough, splitting off the slack when it can hold another
/// header. Release marks the block free, merges it with a free right
/// neighbour, and hands a block that ends up last on the chain back to the
/// OS.
///
/// The allocator holds raw pointers into its own mappings, so it is neither
/// `Send` nor `Sync`. Dropping it unmaps every region still on the chain.
pub struct FreeListAllocator<S: PageSource = Mmap> {
  pub(crate) head: *mut Block,
  pub(crate) source: S,
}

impl FreeListAllocator<Mmap> {
  /// Creates an empty pool backed by `mmap(2)`. Nothing is mapped until the
  /// first allocation.
  pub const fn new() -> Self {
    Self::with_source(Mmap)
  }
}

impl Default for FreeListAllocator<Mmap> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: PageSource> FreeListAllocator<S> {
  pub const fn with_source(source: S) -> Self {
    Self {
      head: ptr::null_mut(),
      source,
    }
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  unsafe fn find_free_block(
    &self,
    size: usize,
  ) -> (*mut Block, *mut Block) {
    unsafe {
      let mut current: *mut Block = self.head;
      let mut last: *mut Block = ptr::null_mut();

      while !current.is_null() {
        if (*current).is_free && (*current).size >= size {
          return (current, last);
        }
        last = current;
        current = (*current).next;
      }

      (ptr::null_mut(), last)
    }
  }

  /// Returns a pointer to at least `size` usable bytes.
  ///
  /// The request is rounded up to a whole machine word. If the OS refuses
  /// to map more memory the process is aborted through
  /// [`handle_alloc_error`]; use [`try_allocate`](Self::try_allocate) to get
  /// the error instead.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> NonNull<u8> {
    match self.try_allocate(size) {
      Ok(payload) => payload,
      Err(err) => {
        log::error!("allocation of {size} bytes failed: {err}");
        let layout = Layout::from_size_align(size, mem::align_of::<Block>())
          .unwrap_or(Layout::new::<Block>());
        handle_alloc_error(layout)
      }
    }
  }

  /// Same as [`allocate`](Self::allocate), but reports OS refusal as an error.
  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, PoolError> {
    let size = checked_align(size)
      .filter(|aligned| aligned.checked_add(HEADER_SIZE).is_some())
      .ok_or(PoolError::SizeOverflow(size))?;

    if self.head.is_null() {
      self.initialize_pool(size)?;
    }

    unsafe {
      let (block, last) = self.find_free_block(size);

      if block.is_null() {
        let block = self.grow(size, last)?;
        return Ok(Block::payload(block));
      }

      if let Some(rest) = Block::split(block, size) {
        atrace!(
          "split {:p}: kept {} bytes, free remainder {:p} of {} bytes",
          block,
          size,
          rest,
          (*rest).size
        );
      }

      (*block).is_free = false;
      atrace!("allocated {} bytes from {:p}", (*block).size, block);

      Ok(Block::payload(block))
    }
  }

  /// Returns a block to the pool.
  ///
  /// The block is merged with its right neighbour when that neighbour is
  /// free and directly adjacent. If it is the last block on the chain and
  /// covers a whole mapping, the mapping is released to the OS.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer returned by this allocator that has not
  /// been released yet. Anything else is undefined behaviour and is not
  /// detected.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(payload) = NonNull::new(ptr) else {
      return;
    };

    unsafe {
      let block = Block::from_payload(payload);
      (*block).is_free = true;
      atrace!("released {:p} ({} bytes)", block, (*block).size);

      if let Some(absorbed) = Block::absorb_next(block) {
        adebug!(
          "coalesced {:p} with its {} byte successor, now {} bytes",
          block,
          absorbed,
          (*block).size
        );
      }

      if (*block).next.is_null() {
        self.shrink(block);
      }
    }
  }
}
