/// Calculates the machine word alignment for the given size.
///
/// # Examples
///
/// ```rust
/// use memalloc::align;
///
/// match std::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, ::core::mem::size_of::<usize>())
  };
}

/// Rounds `value` up to the next multiple of `alignment`, which must be a
/// power of two.
///
/// Overflows like plain `+` does; use [`checked_align`](crate::align::checked_align)
/// when the input is caller-controlled.
///
/// ```rust
/// use memalloc::align_to;
///
/// assert_eq!(align_to!(0, 8), 0);
/// assert_eq!(align_to!(9, 8), 16);
/// assert_eq!(align_to!(4096, 4096), 4096);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $alignment:expr) => {
    ($value + $alignment - 1) & !($alignment - 1)
  };
}

/// Word-aligns `value`, or returns `None` if rounding up would overflow.
pub fn checked_align(value: usize) -> Option<usize> {
  let word = core::mem::size_of::<usize>();
  value.checked_add(word - 1).map(|v| v & !(word - 1))
}
