//! A debugging allocation tracker.
//!
//! Route a program's allocations through a [`MemCheck`] and it will remember
//! every live buffer and where it came from, put a canary behind each one, and
//! write a line to a per-process log for every call. Releasing something twice,
//! releasing something it never handed out, or writing past the end of a
//! buffer is logged as it happens. When the program finishes, the final dump
//! lists whatever is still allocated and says whether the run was clean.
//!
//! ```no_run
//! use memcheck::{track_alloc, track_free, MemCheck, MemCheckConfig};
//!
//! let mut mc = MemCheck::new(MemCheckConfig::from_env()?)?.register_final_report_on_exit();
//! mc.initialize_logging("demo", "demo run");
//! let p = track_alloc!(mc, 64);
//! track_free!(mc, p);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod alloc;
pub mod config;
pub mod error;
pub mod memcheck;
pub mod memlog;
pub mod report;
pub mod serialize;
pub mod site;
pub mod util;

#[cfg(test)]
mod test_utils;

pub use alloc::{
    ledger::{AllocRecord, SlotState},
    raw::{DlMallocBackend, LibcMalloc, RawAllocator},
};
pub use config::{MemCheckConfig, MirrorConfig};
pub use error::{ConfigError, FatalError};
pub use memcheck::{Counters, FinalReportGuard, MemCheck};
pub use report::{Report, ReportKind};
pub use site::Site;
