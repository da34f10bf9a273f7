use std::{fmt, marker::PhantomData};

use crate::{
  allocator::FreeListAllocator,
  block::Block,
  os::PageSource,
};

/// Snapshot of one block on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Address of the block header.
  pub address: *const u8,
  /// Address handed out to callers for this block.
  pub payload: *const u8,
  /// Usable bytes, header excluded.
  pub size: usize,
  pub is_free: bool,
  /// Header address of the successor, null at the tail.
  pub next: *const u8,
}

impl fmt::Display for BlockInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "Block at {:p}: size={}, free={}, next={:p}",
      self.address,
      self.size,
      u8::from(self.is_free),
      self.next
    )
  }
}

/// Iterator over the chain, head to tail. Borrowing the allocator keeps the
/// chain frozen while it runs.
pub struct Chain<'a> {
  current: *mut Block,
  _pool: PhantomData<&'a ()>,
}

impl Iterator for Chain<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    if self.current.is_null() {
      return None;
    }

    // SAFETY: every node reachable from the head is a live header, and the
    // shared borrow on the allocator rules out concurrent mutation.
    unsafe {
      let block = self.current;
      self.current = (*block).next;

      Some(BlockInfo {
        address: block.cast::<u8>(),
        payload: Block::payload(block).as_ptr(),
        size: (*block).size,
        is_free: (*block).is_free,
        next: (*block).next.cast::<u8>(),
      })
    }
  }
}

/// Printable listing of the whole chain.
pub struct Report<'a, S: PageSource> {
  allocator: &'a FreeListAllocator<S>,
}

impl<S: PageSource> fmt::Display for Report<'_, S> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "Free List:")?;
    for block in self.allocator.chain() {
      writeln!(f, "{block}")?;
    }
    Ok(())
  }
}

impl<S: PageSource> FreeListAllocator<S> {
  /// Walks every block, free or allocated, without touching any of them.
  pub fn chain(&self) -> Chain<'_> {
    Chain {
      current: self.head,
      _pool: PhantomData,
    }
  }

  pub fn report(&self) -> Report<'_, S> {
    Report { allocator: self }
  }

  /// Prints [`report`](Self::report) to stdout, followed by a blank line.
  pub fn print_free_list(&self) {
    println!("{}", self.report());
  }
}
