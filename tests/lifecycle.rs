use std::{fs, path::PathBuf, ptr};

use memcheck::{
    site, track_alloc, track_free, MemCheck, MemCheckConfig, ReportKind, Site, SlotState,
};

fn config(dir: &tempfile::TempDir) -> MemCheckConfig {
    MemCheckConfig::default().with_log_dir(dir.path())
}

fn expected_log(dir: &tempfile::TempDir, program: &str) -> PathBuf {
    dir.path()
        .join(format!("{program}_mem.{}.log", std::process::id()))
}

#[test]
fn clean_run_is_declared_safe() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut mc = MemCheck::new(config(&dir)).unwrap().register_final_report_on_exit();
        mc.initialize_logging("clean", "clean run");
        assert_eq!(mc.log().path(), Some(expected_log(&dir, "clean").as_path()));

        let mut live = Vec::new();
        for size in [1, 10, 100, 1000] {
            live.push(track_alloc!(mc, size));
        }
        for ptr in live {
            track_free!(mc, ptr);
        }
        assert!(!mc.has_errors());
    }

    let text = fs::read_to_string(expected_log(&dir, "clean")).unwrap();
    assert_eq!(text.matches("zalloc [").count(), 4);
    assert_eq!(text.matches("free   [").count(), 4);
    assert!(text.contains("---[ Memory dump for (clean run) ]---"));
    assert!(text.contains("Total number of bytes not freed...: 0"));
    assert!(text.contains("=> Program seems to be memory allocation safe..."));
}

#[test]
fn double_free_is_traced_back() {
    let dir = tempfile::tempdir().unwrap();
    let at = |line| Site::new("a.c", line, "foo");
    let report = {
        let mut mc = MemCheck::new(config(&dir)).unwrap();
        mc.initialize_logging("twice", "double free");
        let p = mc.allocate(64, at(10));
        mc.release(p, at(12));
        mc.release(p, at(13));
        assert_eq!(mc.records()[0].state, SlotState::FreeNotAlloc);
        mc.final_dump().unwrap()
    };
    assert!(!report.is_safe());
    assert_eq!(report.summary.bad_entries, 1);
    assert_eq!(report.summary.mallocs, 1);

    let text = fs::read_to_string(expected_log(&dir, "twice")).unwrap();
    assert!(text.contains("not found at a.c,  13, foo"));
    assert!(text.contains("  -> pointer last released at [  0:  1], at a.c,  12, foo"));
    assert!(text.contains("pointer not found in table to free("));
    assert!(text.contains("=> Program seems to have some memory problem !!!"));
}

#[test]
fn leaks_overruns_and_nulls_all_show_up() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut mc = MemCheck::new(config(&dir)).unwrap().register_final_report_on_exit();
        mc.initialize_logging("messy", "messy run");

        let short = mc.allocate(5, site!("short"));
        // SAFETY: the sixth byte lands in the canary, inside the allocation
        unsafe { short.copy_from_nonoverlapping(b"hello\0".as_ptr(), 6) };
        mc.release(short, site!("short"));

        mc.release(ptr::null_mut(), site!("null"));
        let grown = mc.resize(ptr::null_mut(), 7, site!("grown"));
        assert!(!grown.is_null());

        let snapshot = mc.dump_snapshot();
        assert_eq!(snapshot.kind, ReportKind::Snapshot);
        assert_eq!(snapshot.summary.bytes_allocated, 7);
        assert_eq!(snapshot.summary.overruns, 1);
        assert_eq!(snapshot.summary.bad_entries, 2);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"OVERRUN\""));
        assert!(json.contains("\"REALLOC_NULL\""));
    }

    let text = fs::read_to_string(expected_log(&dir, "messy")).unwrap();
    assert!(text.contains("free corrupt, buffer overrun"));
    assert!(text.contains("Check_sum"));
    assert!(text.contains("free NULL in"));
    assert!(text.contains("realloc NULL,    7 in"));
    assert!(text.contains("buffer overrun!:"));
    assert!(text.contains("null pointer to free(nil)!"));
    assert!(text.contains("null pointer to realloc(nil,7)!"));
    assert!(text.contains("    7 not released!:"));
    assert!(text.contains("Number of buffer overrun..........: 1"));
    assert!(text.contains("=> Program seems to have some memory problem !!!"));
}

#[test]
fn suppressed_child_writes_no_final_dump() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut mc = MemCheck::new(config(&dir)).unwrap().register_final_report_on_exit();
        mc.initialize_logging("child", "forked child");
        let _ = mc.allocate(16, site!());
        mc.suppress_final_report_for_child();
    }
    let text = fs::read_to_string(expected_log(&dir, "child")).unwrap();
    assert!(text.contains("zalloc ["));
    assert!(!text.contains("Memory dump"));
}

#[test]
fn log_file_is_appended_to() {
    let dir = tempfile::tempdir().unwrap();
    for run in 0..2 {
        let mut mc = MemCheck::new(config(&dir)).unwrap();
        mc.initialize_logging("again", "appending");
        let p = mc.allocate(run + 1, site!());
        mc.release(p, site!());
    }
    let text = fs::read_to_string(expected_log(&dir, "again")).unwrap();
    assert_eq!(text.matches("zalloc [").count(), 2);
}
