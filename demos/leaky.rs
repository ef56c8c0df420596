//! A small program with every kind of mistake the tracker knows about.
//!
//! ```sh
//! MEMCHECK_CONSOLE=1 MEMCHECK_MIRROR=anomaly RUST_LOG=memcheck=warn cargo run --example leaky
//! ```

use std::error::Error;

use log::info;
use memcheck::{site, track_alloc, track_free, track_realloc, MemCheck, MemCheckConfig};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = MemCheckConfig::from_env()?;
    let mut mc = MemCheck::new(config)?.register_final_report_on_exit();
    mc.initialize_logging("leaky", "leaky demo");
    if let Some(path) = mc.log().path() {
        info!("event log at {}", path.display());
    }

    // Fine
    let name = track_alloc!(mc, 32);
    let name = track_realloc!(mc, name, 64);
    track_free!(mc, name);

    // Released twice
    let twice = mc.allocate(64, site!("twice"));
    mc.release(twice, site!("twice"));
    mc.release(twice, site!("twice"));

    // One byte too many
    let short = track_alloc!(mc, 5);
    // SAFETY: not safe at all, but the canary behind the buffer absorbs it
    unsafe { short.copy_from_nonoverlapping(b"hello\0".as_ptr(), 6) };
    track_free!(mc, short);

    // Never released
    let _leak = mc.allocate(128, site!("leak"));
    mc.dump_snapshot();

    Ok(())
}
