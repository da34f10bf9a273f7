use std::io;

use thiserror::Error;

/// Failures of the pool's OS interactions and bookkeeping.
#[derive(Debug, Error)]
pub enum PoolError {
  /// The OS refused to map a new region.
  #[error("mmap of {len} bytes failed: {source}")]
  Map {
    len: usize,
    #[source]
    source: io::Error,
  },

  /// The OS refused to release a region. Only ever logged.
  #[error("munmap of {len} bytes at {base:#x} failed: {source}")]
  Unmap {
    base: usize,
    len: usize,
    #[source]
    source: io::Error,
  },

  /// The request plus its header does not fit in the address space.
  #[error("request for {0} bytes overflows the address space")]
  SizeOverflow(usize),

  #[error("pool is already initialized")]
  AlreadyInitialized,
}
