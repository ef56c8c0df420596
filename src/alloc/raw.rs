//! The allocators that actually hand out memory. The ledger never touches the
//! heap directly; everything goes through a [`RawAllocator`].

use std::ptr::NonNull;

use dlmalloc::Dlmalloc;

use crate::util::hint::cold;

/// Alignment we ask of every backend. `malloc()` gives at least this on every
/// platform we care about, so both backends agree.
pub const RAW_ALIGN: usize = 16;

/// A byte-oriented allocator, in the shape of `calloc()`/`realloc()`/`free()`.
///
/// # Safety
///
/// - `alloc_zeroed()` must return a pointer valid for reads and writes of
///   `size` bytes, all of which are zero, aligned to at least [`RAW_ALIGN`]
/// - `realloc()` must preserve the first `min(old_size, new_size)` bytes
pub unsafe trait RawAllocator {
    /// Allocate `size` zeroed bytes, `None` if the allocator is exhausted.
    fn alloc_zeroed(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must have come from this allocator with a size of `old_size`, and
    /// must not have been freed.
    unsafe fn realloc(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// Same contract as [`RawAllocator::realloc()`]. `ptr` is dangling
    /// afterwards.
    unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize);
}

/// The C library's `malloc()` family. This is what a debug build of a C
/// program would have been calling anyway.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcMalloc;

// SAFETY: `calloc()` zero-fills and is aligned for any fundamental type
// (>= 16 bytes on x86_64/aarch64 glibc and musl); `realloc()` preserves
// contents.
unsafe impl RawAllocator for LibcMalloc {
    fn alloc_zeroed(&mut self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: `calloc()` has no preconditions
        let data = unsafe { libc::calloc(1, size) };
        if data.is_null() {
            return cold(|| None);
        }
        NonNull::new(data as *mut u8)
    }

    unsafe fn realloc(
        &mut self,
        ptr: NonNull<u8>,
        _old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: caller guarantees `ptr` is a live `calloc()` allocation
        let data = unsafe { libc::realloc(ptr.as_ptr() as _, new_size) };
        NonNull::new(data as *mut u8)
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>, _size: usize) {
        // SAFETY: identical contract to caller
        unsafe { libc::free(ptr.as_ptr() as _) }
    }
}

/// A private `dlmalloc()` heap. Handy when you want the tracked allocations
/// kept away from the rest of the process' heap, so that a corrupting write
/// can't take out the system allocator's own metadata.
pub struct DlMallocBackend {
    heap: Dlmalloc,
}

impl DlMallocBackend {
    pub const fn new() -> Self {
        Self {
            heap: Dlmalloc::new(),
        }
    }
}

impl Default for DlMallocBackend {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: `Dlmalloc::calloc()` zero-fills, and we always request `RAW_ALIGN`.
unsafe impl RawAllocator for DlMallocBackend {
    fn alloc_zeroed(&mut self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: `RAW_ALIGN` is a power of two, `size` is non-zero for every
        // caller in this crate (there is always a canary)
        let data = unsafe { self.heap.calloc(size, RAW_ALIGN) };
        if data.is_null() {
            return cold(|| None);
        }
        NonNull::new(data)
    }

    unsafe fn realloc(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: caller guarantees `ptr` came from this heap with `old_size`,
        // and we only ever allocate with `RAW_ALIGN`
        let data = unsafe { self.heap.realloc(ptr.as_ptr(), old_size, RAW_ALIGN, new_size) };
        NonNull::new(data)
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: see `realloc()`
        unsafe { self.heap.free(ptr.as_ptr(), size, RAW_ALIGN) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<A: RawAllocator>(alloc: &mut A) {
        let data = alloc.alloc_zeroed(40).unwrap();
        assert_eq!(data.as_ptr() as usize % RAW_ALIGN, 0);
        // SAFETY: 40 bytes were just allocated
        unsafe {
            assert!(std::slice::from_raw_parts(data.as_ptr(), 40)
                .iter()
                .all(|&b| b == 0));
            data.as_ptr().write(0xab);
            let data = alloc.realloc(data, 40, 4096).unwrap();
            assert_eq!(data.as_ptr().read(), 0xab);
            alloc.free(data, 4096);
        }
    }

    #[test]
    fn libc_malloc_zeroes_and_keeps_contents() {
        exercise(&mut LibcMalloc);
    }

    #[test]
    fn dlmalloc_zeroes_and_keeps_contents() {
        exercise(&mut DlMallocBackend::new());
    }
}
