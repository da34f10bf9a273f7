//! # memalloc - A First-Fit Free-List Allocator
//!
//! This crate provides a user-space allocator that carves variable-size
//! blocks out of anonymous memory mappings obtained with `mmap(2)`.
//!
//! ## Overview
//!
//! Every block in the pool, free or allocated, is linked into one chain.
//! Each block starts with a header and is followed by its payload:
//!
//! ```text
//!   Chain of blocks:
//!
//!   head
//!    │
//!    ▼
//!   ┌────────┬──────────┐   ┌────────┬──────────────┐   ┌────────┬───────┐
//!   │ Header │ payload  │──►│ Header │   (free)     │──►│ Header │payload│──► null
//!   │ busy   │          │   │ free   │              │   │ busy   │       │
//!   └────────┴──────────┘   └────────┴──────────────┘   └────────┴───────┘
//!   └──────────── mapping A ───────────────────────┘   └── mapping B ───┘
//! ```
//!
//! The chain is in creation order, not address order: a block appended
//! when the pool grows lives in its own mapping, wherever the kernel put it.
//!
//! ## Crate Structure
//!
//! ```text
//!   memalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── allocator  - FreeListAllocator: allocate / release
//!   ├── block      - Block header and pointer arithmetic (internal)
//!   ├── error      - PoolError
//!   ├── inspect    - Read-only chain traversal and report
//!   ├── os         - PageSource trait and the mmap-backed Mmap source
//!   └── pool       - Pool init, growth, tail shrink, teardown (internal)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use memalloc::FreeListAllocator;
//!
//! let mut allocator = FreeListAllocator::new();
//!
//! let ptr = allocator.allocate(128).as_ptr().cast::<u64>();
//! unsafe {
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!
//!     allocator.release(ptr.cast());
//! }
//! ```
//!
//! ## How It Works
//!
//! - **Allocation** scans the chain from the head and takes the first free
//!   block that is large enough. If the slack past the request can hold
//!   another header plus at least one word, it is split off as a new free
//!   block right after the allocated one. If no block fits, a new mapping
//!   sized to the request is appended to the chain.
//! - **Release** marks the block free and merges it with its right
//!   neighbour when that neighbour is free and sits right after it in the
//!   same mapping. Only one merge happens per release, and never leftwards.
//! - **Shrink**: a released block that ends up last on the chain and covers
//!   its whole mapping is unmapped and removed from the chain. A split-off
//!   fragment is never partially unmapped.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: the allocator is neither `Send` nor `Sync`
//! - **No backward coalescing**: freed blocks only merge rightwards
//! - **Word alignment only**: requests are rounded up to the machine word
//! - **Unix-only**: requires `libc` and `mmap` (POSIX systems)
//!
//! ## Safety
//!
//! Releasing a pointer that did not come from the same allocator, or
//! releasing it twice, is undefined behaviour and is not detected.

use std::sync::atomic::{AtomicBool, Ordering};

#[macro_use]
mod alog;

pub mod align;
mod allocator;
mod block;
mod error;
mod inspect;
pub mod os;
mod pool;

pub use allocator::FreeListAllocator;
pub use block::HEADER_SIZE;
pub use error::PoolError;
pub use inspect::{BlockInfo, Chain, Report};
pub use os::{Mmap, PageSource};

static ALLOC_LOG: AtomicBool = AtomicBool::new(false);

/// Turns on debug and trace logging of pool operations.
///
/// Errors and failed unmaps are logged regardless.
pub fn enable_logging() {
  ALLOC_LOG.store(true, Ordering::Relaxed);
}

/// Disables logging for the allocator
pub fn disable_logging() {
  ALLOC_LOG.store(false, Ordering::Relaxed);
}

pub(crate) fn should_log() -> bool {
  ALLOC_LOG.load(Ordering::Relaxed)
}

#[cfg(test)]
pub(crate) mod test_common {
  use std::{cell::RefCell, io, ptr::NonNull, rc::Rc};

  use crate::os::{Mmap, PageSource};

  pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
    crate::enable_logging();
  }

  /// Page source that records every call and can be told to fail.
  #[derive(Debug, Default)]
  pub struct Recording {
    inner: Mmap,
    pub maps: Vec<(usize, usize)>,
    unmaps: Rc<RefCell<Vec<(usize, usize)>>>,
    map_budget: Option<usize>,
    fail_unmap: bool,
  }

  impl Recording {
    /// Lets the first `maps` mappings succeed and refuses the rest.
    pub fn with_map_budget(maps: usize) -> Self {
      Self {
        map_budget: Some(maps),
        ..Self::default()
      }
    }

    pub fn failing_unmap() -> Self {
      Self {
        fail_unmap: true,
        ..Self::default()
      }
    }

    pub fn unmaps(&self) -> Vec<(usize, usize)> {
      self.unmaps.borrow().clone()
    }

    /// Handle on the unmap log that outlives the allocator.
    pub fn unmap_log(&self) -> Rc<RefCell<Vec<(usize, usize)>>> {
      Rc::clone(&self.unmaps)
    }
  }

  unsafe impl PageSource for Recording {
    fn map(
      &mut self,
      len: usize,
    ) -> io::Result<NonNull<u8>> {
      if let Some(budget) = self.map_budget.as_mut() {
        if *budget == 0 {
          return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        *budget -= 1;
      }

      let base = self.inner.map(len)?;
      self.maps.push((base.as_ptr() as usize, len));
      Ok(base)
    }

    unsafe fn unmap(
      &mut self,
      base: NonNull<u8>,
      len: usize,
    ) -> io::Result<()> {
      if self.fail_unmap {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
      }

      unsafe { self.inner.unmap(base, len)? };
      self.unmaps.borrow_mut().push((base.as_ptr() as usize, len));
      Ok(())
    }
  }
}
