//! Virtual memory primitives the pool is built on.
//!
//! The pool only needs two capabilities from the OS: map an anonymous
//! read/write range of N bytes, and unmap it again. [`PageSource`] names
//! them so the pool can run over something other than `mmap(2)`.

use std::{io, ptr, ptr::NonNull};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void, mmap, munmap};

/// Supplier of raw memory ranges for a pool.
///
/// # Safety
///
/// A successful [`map`](PageSource::map) must return a readable and writable
/// range of at least `len` bytes, aligned to at least a machine word, that
/// stays valid until it is passed back to [`unmap`](PageSource::unmap).
pub unsafe trait PageSource {
  fn map(
    &mut self,
    len: usize,
  ) -> io::Result<NonNull<u8>>;

  /// # Safety
  ///
  /// `base` and `len` must describe exactly one range returned by `map`,
  /// and nothing may touch that range afterwards.
  unsafe fn unmap(
    &mut self,
    base: NonNull<u8>,
    len: usize,
  ) -> io::Result<()>;
}

/// Anonymous private mappings from `mmap(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mmap;

unsafe impl PageSource for Mmap {
  fn map(
    &mut self,
    len: usize,
  ) -> io::Result<NonNull<u8>> {
    // SAFETY: anonymous mapping with a null hint; the kernel validates the rest.
    let addr = unsafe {
      mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_ANONYMOUS | MAP_PRIVATE,
        -1,
        0,
      )
    };

    if addr == MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
  }

  unsafe fn unmap(
    &mut self,
    base: NonNull<u8>,
    len: usize,
  ) -> io::Result<()> {
    // SAFETY: caller guarantees base/len came from `map`.
    if unsafe { munmap(base.as_ptr().cast::<c_void>(), len) } == -1 {
      return Err(io::Error::last_os_error());
    }
    Ok(())
  }
}
