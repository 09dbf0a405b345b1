cfg_if::cfg_if! {
    // Branch prediction hints. Only available on nightly, but they
    // consistently help on the probe paths.
    if #[cfg(feature = "nightly")] {
        pub(crate) use core::intrinsics::{likely, unlikely};
    } else {
        #[inline]
        pub(crate) fn likely(b: bool) -> bool {
            b
        }
        #[inline]
        pub(crate) fn unlikely(b: bool) -> bool {
            b
        }
    }
}
