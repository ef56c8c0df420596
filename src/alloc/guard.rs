//! Trailing canaries. Every tracked buffer is laid out as
//!
//! ```plaintext
//! +--------------------+
//! | user bytes         | `size` bytes, the only part the caller sees
//! +--------------------+
//! | size + CHECK_VAL   | one machine word, unaligned
//! +--------------------+
//! ```
//!
//! A write past the end of the user region lands in the canary first, so
//! comparing the stored word with the one we expect catches most overruns
//! when the buffer is released or resized.

use std::{mem, ptr::NonNull, slice};

#[cfg(target_pointer_width = "64")]
pub const CHECK_VAL: usize = 0xa5a5_5a5a_a5a5_5a5a;
#[cfg(target_pointer_width = "32")]
pub const CHECK_VAL: usize = 0xa5a5_5a5a;
#[cfg(target_pointer_width = "16")]
pub const CHECK_VAL: usize = 0xa5a5;

/// Bytes taken up by the canary after every buffer
pub const CANARY_LEN: usize = mem::size_of::<usize>();

/// The canary we expect behind a buffer of `size` user bytes
pub const fn expected_canary(size: usize) -> usize {
    size.wrapping_add(CHECK_VAL)
}

/// Total bytes to request from the underlying allocator for `size` user bytes.
pub const fn guarded_len(size: usize) -> Option<usize> {
    size.checked_add(CANARY_LEN)
}

/// A user buffer together with the canary that trails it. This is only ever a
/// *view* -- it does not own the memory and never frees it.
#[derive(Clone, Copy, Debug)]
pub struct GuardedBuffer {
    data: NonNull<u8>,
    size: usize,
}

impl GuardedBuffer {
    /// # Safety
    ///
    /// `data` must be valid for reads and writes of `size + CANARY_LEN` bytes
    /// for as long as this view is used.
    pub const unsafe fn new(data: NonNull<u8>, size: usize) -> Self {
        Self { data, size }
    }

    /// Where the user's bytes start. This is the only pointer that leaves the
    /// crate.
    pub const fn user_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    fn canary_ptr(&self) -> *mut usize {
        // SAFETY: within (or one past) the `size + CANARY_LEN` allocation
        unsafe { self.data.as_ptr().add(self.size) as *mut usize }
    }

    /// Write the canary for the current size.
    pub fn arm(&self) {
        // SAFETY: `new()` guarantees the canary bytes are writable. The
        // canary sits right after `size` arbitrary bytes, so no alignment.
        unsafe {
            self.canary_ptr()
                .write_unaligned(expected_canary(self.size))
        }
    }

    /// What is in memory where the canary should be
    pub fn stored_canary(&self) -> usize {
        // SAFETY: see `arm()`
        unsafe { self.canary_ptr().read_unaligned() }
    }

    pub fn is_intact(&self) -> bool {
        self.stored_canary() == expected_canary(self.size)
    }

    /// The user bytes and the canary, as they are right now. Used for the
    /// corruption dump.
    pub fn raw_bytes(&self) -> &[u8] {
        // SAFETY: `new()` guarantees `size + CANARY_LEN` readable bytes, and
        // `u8` has no invalid bit patterns
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.size + CANARY_LEN) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_buffer<R>(size: usize, f: impl FnOnce(GuardedBuffer) -> R) -> R {
        let mut storage = vec![0u8; size + CANARY_LEN];
        let data = NonNull::new(storage.as_mut_ptr()).unwrap();
        // SAFETY: `storage` outlives the view
        f(unsafe { GuardedBuffer::new(data, size) })
    }

    #[test]
    fn armed_buffer_is_intact() {
        for size in [0, 1, 7, 8, 13, 64] {
            with_buffer(size, |buf| {
                buf.arm();
                assert!(buf.is_intact());
                assert_eq!(buf.stored_canary(), size.wrapping_add(CHECK_VAL));
            });
        }
    }

    #[test]
    fn one_byte_past_the_end_breaks_the_canary() {
        with_buffer(13, |buf| {
            buf.arm();
            // SAFETY: byte 13 is the first canary byte, inside the storage
            unsafe { buf.user_ptr().add(13).write(0) };
            assert!(!buf.is_intact());
        });
    }

    #[test]
    fn writes_inside_the_buffer_leave_it_alone() {
        with_buffer(32, |buf| {
            buf.arm();
            // SAFETY: 32 user bytes
            unsafe { buf.user_ptr().write_bytes(0xff, 32) };
            assert!(buf.is_intact());
            assert_eq!(buf.raw_bytes().len(), 32 + CANARY_LEN);
        });
    }

    #[test]
    fn canary_depends_on_size() {
        assert_ne!(expected_canary(64), expected_canary(65));
        assert_eq!(guarded_len(usize::MAX), None);
    }
}
