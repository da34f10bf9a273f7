//! Pool management: getting regions from the [`PageSource`] and giving
//! them back.

use std::ptr;

use crate::{
  align::checked_align,
  allocator::FreeListAllocator,
  block::{Block, HEADER_SIZE, Mapping},
  error::PoolError,
  os::PageSource,
};

impl<S: PageSource> FreeListAllocator<S> {
  fn map_region(
    &mut self,
    size: usize,
  ) -> Result<Mapping, PoolError> {
    let len = size
      .checked_add(HEADER_SIZE)
      .ok_or(PoolError::SizeOverflow(size))?;
    let base = self
      .source
      .map(len)
      .map_err(|source| PoolError::Map { len, source })?;

    Ok(Mapping { base, len })
  }

  /// Maps the first region of the pool as a single free block of `size`
  /// usable bytes.
  ///
  /// Called by [`allocate`](Self::allocate) on first use; calling it on a
  /// pool that already has blocks fails with
  /// [`PoolError::AlreadyInitialized`].
  pub fn initialize_pool(
    &mut self,
    size: usize,
  ) -> Result<(), PoolError> {
    if !self.head.is_null() {
      return Err(PoolError::AlreadyInitialized);
    }

    let size = checked_align(size).ok_or(PoolError::SizeOverflow(size))?;
    let mapping = self.map_region(size)?;

    // SAFETY: fresh mapping of `size + HEADER_SIZE` writable bytes.
    self.head = unsafe { Block::init(mapping, true) };
    adebug!(
      "pool initialized at {:p} with {} usable bytes",
      self.head,
      size
    );

    Ok(())
  }

  /// Maps a region for a request nothing on the chain could serve and
  /// appends it after `last` as an allocated block.
  pub(crate) unsafe fn grow(
    &mut self,
    size: usize,
    last: *mut Block,
  ) -> Result<*mut Block, PoolError> {
    let mapping = self.map_region(size)?;

    unsafe {
      let block = Block::init(mapping, false);

      if last.is_null() {
        self.head = block;
      } else {
        (*last).next = block;
      }

      adebug!("pool grown by {} bytes at {:p}", mapping.len, block);
      Ok(block)
    }
  }

  /// Gives a freed tail block back to the OS and detaches it from the chain.
  ///
  /// Only a block covering its whole mapping is unmapped. A split-off
  /// fragment stays on the chain as a free block, and so does a block the
  /// OS refuses to unmap.
  pub(crate) unsafe fn shrink(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      if !Block::spans_mapping(block) {
        adebug!(
          "tail {:p} is part of the mapping at {:p}, keeping it",
          block,
          (*block).mapping.base
        );
        return;
      }

      let mapping = (*block).mapping;
      if let Err(source) = self.source.unmap(mapping.base, mapping.len) {
        let err = PoolError::Unmap {
          base: mapping.base.as_ptr() as usize,
          len: mapping.len,
          source,
        };
        log::warn!("{err}");
        return;
      }

      if self.head == block {
        self.head = ptr::null_mut();
      } else {
        let prev = self.predecessor(block);
        if !prev.is_null() {
          (*prev).next = ptr::null_mut();
        }
      }

      adebug!("pool shrunk by {} bytes at {:p}", mapping.len, block);
    }
  }

  /// Walks the chain up to the node whose successor is `block`. Never reads
  /// `block` itself.
  unsafe fn predecessor(
    &self,
    block: *mut Block,
  ) -> *mut Block {
    unsafe {
      let mut current = self.head;
      while !current.is_null() && (*current).next != block {
        current = (*current).next;
      }
      current
    }
  }

  /// Every mapping still referenced by the chain, found through the block
  /// sitting at each mapping's base.
  fn mappings(&self) -> Vec<Mapping> {
    let mut mappings = Vec::new();
    let mut current = self.head;

    unsafe {
      while !current.is_null() {
        let mapping = (*current).mapping;
        if current.cast::<u8>() == mapping.base.as_ptr() {
          mappings.push(mapping);
        }
        current = (*current).next;
      }
    }

    mappings
  }
}

impl<S: PageSource> Drop for FreeListAllocator<S> {
  fn drop(&mut self) {
    let mappings = self.mappings();
    self.head = ptr::null_mut();

    for Mapping { base, len } in mappings {
      // SAFETY: each mapping came from `map_region` and is unmapped once.
      if let Err(source) = unsafe { self.source.unmap(base, len) } {
        log::warn!(
          "{}",
          PoolError::Unmap {
            base: base.as_ptr() as usize,
            len,
            source,
          }
        );
      }
    }
  }
}
