macro_rules! adebug {
  ($($arg:tt)*) => {
    if $crate::should_log() {
      ::log::debug!($($arg)*);
    }
  };
}

macro_rules! atrace {
  ($($arg:tt)*) => {
    if $crate::should_log() {
      ::log::trace!($($arg)*);
    }
  };
}
