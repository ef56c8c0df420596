/// Run `f` on a path the optimiser should treat as unlikely, such as the
/// underlying allocator running dry.
#[cold]
#[inline(never)]
pub fn cold<R>(f: impl FnOnce() -> R) -> R {
    f()
}
