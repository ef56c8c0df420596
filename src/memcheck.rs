//! The tracking context. One [`MemCheck`] owns the ledger, the free history,
//! the counters and the event log, and every tracked call goes through it.
//!
//! Nothing in here is synchronised: the host either calls in from a single
//! thread or serialises the calls itself. `MemCheck` holds raw pointers, so
//! the compiler won't let it cross threads by accident anyway.

use std::{
    io::Write,
    ops::{Deref, DerefMut},
    process,
    ptr::{self, NonNull},
};

use log::{error, warn};

use crate::{
    alloc::{
        guard::{expected_canary, guarded_len, GuardedBuffer, CANARY_LEN},
        history::{FreeHistory, FreeHistoryEntry},
        ledger::{AllocRecord, Ledger, SlotState},
        raw::{LibcMalloc, RawAllocator},
    },
    config::MemCheckConfig,
    error::{ConfigError, FatalError},
    memlog::{EventClass, MemLog, MIRROR_TARGET, TIME_STR_LEN},
    report::{Report, ReportKind},
    site::Site,
    util::hexdump::HexDump,
};

/// Running totals, updated on every call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    /// Bytes in `Allocated` records, excluding canaries
    pub tracked_bytes: usize,
    /// High-water mark of `tracked_bytes`
    pub peak_bytes: usize,
    /// Allocate calls, including the ones made on behalf of `resize(null)`
    pub mallocs: usize,
    pub reallocs: usize,
    /// Allocations not yet released
    pub active_entries: usize,
}

impl Counters {
    fn grow(&mut self, by: usize) {
        self.tracked_bytes += by;
        self.peak_bytes = self.peak_bytes.max(self.tracked_bytes);
    }
}

pub struct MemCheck<A: RawAllocator = LibcMalloc> {
    config: MemCheckConfig,
    allocator: A,
    ledger: Ledger,
    history: FreeHistory,
    counters: Counters,
    log: MemLog,
    banner: String,
    /// Sticky: set on the first anomaly, never cleared
    error_detected: bool,
    skip_final: bool,
    final_done: bool,
}

impl MemCheck<LibcMalloc> {
    pub fn new(config: MemCheckConfig) -> Result<Self, ConfigError> {
        Self::with_allocator(config, LibcMalloc)
    }
}

impl<A: RawAllocator> MemCheck<A> {
    /// Build a tracker on top of `allocator`. Until
    /// [`MemCheck::initialize_logging()`] is called, events are dropped.
    pub fn with_allocator(config: MemCheckConfig, allocator: A) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ledger: Ledger::with_capacity(config.max_alloc_list),
            history: FreeHistory::new(config.free_history_len),
            log: MemLog::detached(config.mirror),
            counters: Counters::default(),
            banner: String::new(),
            error_detected: false,
            skip_final: false,
            final_done: false,
            allocator,
            config,
        })
    }

    /// Open the event log for `program` (a file in the configured directory,
    /// or stderr in console mode). `banner` heads every dump.
    ///
    /// Call this before the first tracked allocation, otherwise those events
    /// are lost.
    pub fn initialize_logging(&mut self, program: &str, banner: &str) {
        self.log = MemLog::open(program, &self.config);
        self.banner = banner.to_owned();
    }

    /// Like [`MemCheck::initialize_logging()`], but into any writer
    pub fn log_to_writer(&mut self, writer: Box<dyn Write>, banner: &str) {
        self.log = MemLog::to_writer(writer, self.config.mirror);
        self.banner = banner.to_owned();
    }

    pub fn config(&self) -> &MemCheckConfig {
        &self.config
    }

    pub fn log(&self) -> &MemLog {
        &self.log
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn tracked_bytes(&self) -> usize {
        self.counters.tracked_bytes
    }

    pub fn peak_bytes(&self) -> usize {
        self.counters.peak_bytes
    }

    pub fn active_entries(&self) -> usize {
        self.counters.active_entries
    }

    /// `true` once any anomaly has been seen
    pub fn has_errors(&self) -> bool {
        self.error_detected
    }

    pub fn record(&self, slot: usize) -> Option<&AllocRecord> {
        self.ledger.get(slot)
    }

    pub fn records(&self) -> &[AllocRecord] {
        self.ledger.records()
    }

    pub fn history(&self) -> &FreeHistory {
        &self.history
    }

    /// Allocate `size` zeroed bytes and start tracking them.
    ///
    /// Aborts the process if the underlying allocator is exhausted or the
    /// ledger is full.
    pub fn allocate(&mut self, size: usize, site: Site) -> *mut u8 {
        match self.try_allocate(size, site) {
            Ok(data) => data.as_ptr(),
            Err(e) => self.fatal(e),
        }
    }

    /// Release a tracked buffer. Null and unknown pointers are recorded and
    /// logged, never passed to the allocator.
    ///
    /// Aborts only if recording the misuse needs a slot the ledger doesn't
    /// have.
    pub fn release(&mut self, ptr: *mut u8, site: Site) {
        if let Err(e) = self.try_release(ptr, site) {
            self.fatal(e)
        }
    }

    /// `realloc()` for tracked buffers. `new_size == 0` releases `ptr` and
    /// returns null; a null `ptr` allocates (and is flagged, see
    /// [`MemCheck::try_resize()`]). Returns null if `ptr` isn't tracked.
    pub fn resize(&mut self, ptr: *mut u8, new_size: usize, site: Site) -> *mut u8 {
        match self.try_resize(ptr, new_size, site) {
            Ok(data) => data,
            Err(e) => self.fatal(e),
        }
    }

    pub fn try_allocate(&mut self, size: usize, site: Site) -> Result<NonNull<u8>, FatalError> {
        let total = guarded_len(size).ok_or(FatalError::OutOfMemory { requested: size })?;
        let data = self
            .allocator
            .alloc_zeroed(total)
            .ok_or(FatalError::OutOfMemory { requested: total })?;
        // SAFETY: `data` was just allocated with `size + CANARY_LEN` bytes
        let buf = unsafe { GuardedBuffer::new(data, size) };
        buf.arm();

        let record = AllocRecord::new(SlotState::Allocated, data.as_ptr(), size, site);
        let i = match self.ledger.insert(record, None) {
            Ok(i) => i,
            Err(e) => {
                // SAFETY: untracked and never handed out
                unsafe { self.allocator.free(data, total) };
                return Err(e);
            }
        };

        let n = self.ledger.high_water();
        let ptr = data.as_ptr();
        self.log.event(
            EventClass::Allocation,
            format_args!("zalloc [{i:3}:{n:3}], {ptr:p}, {size:4} at {site}"),
        );

        self.counters.grow(size);
        self.counters.mallocs += 1;
        self.counters.active_entries += 1;
        Ok(data)
    }

    pub fn try_release(&mut self, ptr: *mut u8, site: Site) -> Result<(), FatalError> {
        let Some(data) = NonNull::new(ptr) else {
            let record = AllocRecord::new(SlotState::FreeNull, ptr::null_mut(), 0, site);
            self.ledger.insert(record, None)?;
            self.error_detected = true;
            self.log
                .event(EventClass::Anomaly, format_args!("free NULL in {site}"));
            return Ok(());
        };
        let Some(i) = self.ledger.find_allocated(ptr) else {
            return self.not_allocated(SlotState::FreeNotAlloc, ptr, 0, site);
        };

        let record = self.ledger.records()[i];
        // SAFETY: an `Allocated` record means `ptr` is a live allocation of
        // `size + CANARY_LEN` bytes from `self.allocator`
        let buf = unsafe { GuardedBuffer::new(data, record.size) };
        if buf.is_intact() {
            self.ledger.recycle(i);
        } else {
            // Stays in the ledger as evidence
            if let Some(r) = self.ledger.get_mut(i) {
                r.state = SlotState::Overrun;
            }
            self.report_overrun("free", i, buf, site);
        }

        self.counters.tracked_bytes -= record.size;
        // SAFETY: see above; the buffer is not referenced again
        unsafe { self.allocator.free(data, record.size + CANARY_LEN) };

        let n = self.ledger.high_water();
        let size = record.size;
        self.log.event(
            EventClass::Release,
            format_args!("free   [{i:3}:{n:3}], {ptr:p}, {size:4} at {site}"),
        );
        self.history.push(FreeHistoryEntry { ptr, slot: i, site });
        self.counters.active_entries -= 1;
        Ok(())
    }

    /// Resizing a null pointer is legal C, but in practice it is usually a
    /// pointer that should have been set and wasn't, so it is recorded as
    /// [`SlotState::ReallocNull`] and sets the error indicator on top of
    /// allocating.
    pub fn try_resize(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
        site: Site,
    ) -> Result<*mut u8, FatalError> {
        if new_size == 0 {
            self.log.event(
                EventClass::Resize,
                format_args!("realloc {ptr:p},    0 converted to free"),
            );
            self.try_release(ptr, site)?;
            return Ok(ptr::null_mut());
        }

        let Some(data) = NonNull::new(ptr) else {
            let record = AllocRecord::new(SlotState::ReallocNull, ptr::null_mut(), new_size, site);
            self.ledger.insert(record, None)?;
            self.error_detected = true;
            self.log.event(
                EventClass::Anomaly,
                format_args!("realloc NULL, {new_size:4} in {site}"),
            );
            return self.try_allocate(new_size, site).map(NonNull::as_ptr);
        };
        let Some(i) = self.ledger.find_allocated(ptr) else {
            self.not_allocated(SlotState::ReallocNotAlloc, ptr, new_size, site)?;
            return Ok(ptr::null_mut());
        };

        let before = self.ledger.records()[i];
        // SAFETY: as in `try_release()`
        let buf = unsafe { GuardedBuffer::new(data, before.size) };
        if !buf.is_intact() {
            // Keep a copy as evidence, the live record carries on being resized
            let evidence = AllocRecord {
                state: SlotState::Overrun,
                ..before
            };
            self.ledger.insert(evidence, Some(i))?;
            self.report_overrun("realloc", i, buf, site);
        }

        let total = guarded_len(new_size).ok_or(FatalError::OutOfMemory {
            requested: new_size,
        })?;
        // SAFETY: `data` is live, from `self.allocator`, `before.size +
        // CANARY_LEN` bytes long
        let moved = unsafe {
            self.allocator
                .realloc(data, before.size + CANARY_LEN, total)
        }
        .ok_or(FatalError::OutOfMemory { requested: total })?;
        // SAFETY: `moved` is `new_size + CANARY_LEN` bytes
        let buf = unsafe { GuardedBuffer::new(moved, new_size) };
        buf.arm();

        self.counters.tracked_bytes -= before.size;
        self.counters.grow(new_size);

        let n = self.ledger.high_water();
        let new_ptr = moved.as_ptr();
        self.log.event(
            EventClass::Resize,
            format_args!(
                "realloc[{i:3}:{n:3}], {:p}, {:4} at {} -> {new_ptr:p}, {new_size:4} at {site}",
                before.ptr, before.size, before.site
            ),
        );

        if let Some(r) = self.ledger.get_mut(i) {
            r.ptr = new_ptr;
            r.size = new_size;
            r.site = site;
        }
        self.counters.reallocs += 1;
        Ok(new_ptr)
    }

    /// Record a release or resize of something we aren't tracking, and say
    /// where it was last released if we still remember.
    fn not_allocated(
        &mut self,
        state: SlotState,
        ptr: *mut u8,
        size: usize,
        site: Site,
    ) -> Result<(), FatalError> {
        self.ledger
            .insert(AllocRecord::new(state, ptr, size, site), None)?;
        self.error_detected = true;

        if state == SlotState::FreeNotAlloc {
            self.log.event(
                EventClass::Anomaly,
                format_args!("free ERROR {ptr:p} not found at {site}"),
            );
        } else {
            self.log.event(
                EventClass::Anomaly,
                format_args!("realloc ERROR {ptr:p}, {size:4} not found at {site}"),
            );
        }

        if let Some(prev) = self.history.last_release_of(ptr).copied() {
            let n = self.ledger.high_water();
            self.log.line(format_args!(
                "  -> pointer last released at [{:3}:{n:3}], at {}",
                prev.slot, prev.site
            ));
        }
        Ok(())
    }

    fn report_overrun(&mut self, op: &str, i: usize, buf: GuardedBuffer, site: Site) {
        self.error_detected = true;
        let n = self.ledger.high_water();
        let (ptr, size) = (buf.user_ptr(), buf.size());
        self.log.event(
            EventClass::Anomaly,
            format_args!("{op} corrupt, buffer overrun [{i:3}:{n:3}], {ptr:p}, {size:4} at {site}"),
        );
        let check = expected_canary(size);
        _ = HexDump::from_slice(buf.raw_bytes()).write_rows(self.log.writer(), TIME_STR_LEN);
        self.log
            .line(format_args!("{:width$}Check_sum", "", width = TIME_STR_LEN));
        _ = HexDump::from_slice(bytemuck::bytes_of(&check)).write_rows(self.log.writer(), TIME_STR_LEN);
    }

    /// Log the error, then abort. There's no sensible way to keep tracking
    /// after either kind of [`FatalError`].
    fn fatal(&mut self, err: FatalError) -> ! {
        self.log
            .event(EventClass::Anomaly, format_args!("FATAL {err}"));
        self.log.flush();
        error!(target: MIRROR_TARGET, "{err}");
        process::abort()
    }

    /// The current state of the ledger as a value
    pub fn report(&self, kind: ReportKind) -> Report {
        Report::build(kind, &self.banner, &self.ledger, &self.counters)
    }

    /// Write a non-terminal dump to the event log. Any number of times.
    pub fn dump_snapshot(&mut self) -> Report {
        let report = self.report(ReportKind::Snapshot);
        _ = report.write_to(self.log.writer());
        self.log.flush();
        report
    }

    /// Write the final dump and verdict. Does nothing the second time, or at
    /// all after [`MemCheck::suppress_final_report_for_child()`].
    pub fn final_dump(&mut self) -> Option<Report> {
        if self.skip_final || self.final_done {
            return None;
        }
        self.final_done = true;

        let report = self.report(ReportKind::Final);
        _ = report.write_to(self.log.writer());
        self.log.flush();
        if !report.is_safe() && self.config.mirror.anomalies {
            match self.log.path() {
                Some(path) => warn!(target: MIRROR_TARGET, "memory problems found, see {}", path.display()),
                None => warn!(target: MIRROR_TARGET, "memory problems found"),
            }
        }
        Some(report)
    }

    /// For a forked child that inherited this state: the parent will report
    /// it, so this process shouldn't.
    pub fn suppress_final_report_for_child(&mut self) {
        self.skip_final = true;
    }

    /// Hand the tracker to a guard that writes the final dump when it goes
    /// out of scope, including while unwinding from a panic. Keep the guard
    /// at the top of `main()`.
    ///
    /// `process::exit()` skips destructors, so it skips the report too.
    pub fn register_final_report_on_exit(self) -> FinalReportGuard<A> {
        FinalReportGuard { inner: self }
    }
}

/// Owns a [`MemCheck`] and runs [`MemCheck::final_dump()`] on drop.
pub struct FinalReportGuard<A: RawAllocator = LibcMalloc> {
    inner: MemCheck<A>,
}

impl<A: RawAllocator> Deref for FinalReportGuard<A> {
    type Target = MemCheck<A>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<A: RawAllocator> DerefMut for FinalReportGuard<A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<A: RawAllocator> Drop for FinalReportGuard<A> {
    fn drop(&mut self) {
        self.inner.final_dump();
    }
}

/// `mc.allocate(size, site!())`
#[macro_export]
macro_rules! track_alloc {
    ($mc:expr, $size:expr) => {
        $mc.allocate($size, $crate::site!())
    };
}

/// `mc.release(ptr, site!())`
#[macro_export]
macro_rules! track_free {
    ($mc:expr, $ptr:expr) => {
        $mc.release($ptr, $crate::site!())
    };
}

/// `mc.resize(ptr, size, site!())`
#[macro_export]
macro_rules! track_realloc {
    ($mc:expr, $ptr:expr, $size:expr) => {
        $mc.resize($ptr, $size, $crate::site!())
    };
}
