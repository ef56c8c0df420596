//! The event log: one line per tracked call, timestamped, appended to a
//! per-process file (or stderr).

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, LineWriter, Write},
    path::{Path, PathBuf},
};

use chrono::Local;
use log::{info, warn};

use crate::config::{MemCheckConfig, MirrorConfig};

/// Width of the `HH:MM:SS ` prefix; continuation lines are indented by this.
pub const TIME_STR_LEN: usize = 9;

/// `log` target used for mirrored events
pub const MIRROR_TARGET: &str = "memcheck";

/// What kind of call produced an event, for deciding whether to mirror it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventClass {
    Allocation,
    Release,
    Resize,
    Anomaly,
}

impl EventClass {
    fn mirrored_by(self, mirror: &MirrorConfig) -> bool {
        match self {
            Self::Allocation => mirror.allocations,
            Self::Release => mirror.releases,
            Self::Resize => mirror.resizes,
            Self::Anomaly => mirror.anomalies,
        }
    }
}

pub enum Sink {
    /// Not initialised yet: events are dropped
    Discard,
    Stderr,
    File(LineWriter<File>),
    Writer(Box<dyn Write>),
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discard => "Discard",
            Self::Stderr => "Stderr",
            Self::File(_) => "File",
            Self::Writer(_) => "Writer",
        })
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Discard => Ok(buf.len()),
            Self::Stderr => io::stderr().write(buf),
            Self::File(f) => f.write(buf),
            Self::Writer(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Discard => Ok(()),
            Self::Stderr => io::stderr().flush(),
            Self::File(f) => f.flush(),
            Self::Writer(w) => w.flush(),
        }
    }
}

/// `<dir>/<program>_mem.<pid>.log`
pub fn log_path(dir: &Path, program: &str, pid: u32) -> PathBuf {
    dir.join(format!("{program}_mem.{pid}.log"))
}

/// `HH:MM:SS `, local time
pub fn timestamp() -> String {
    Local::now().format("%T ").to_string()
}

#[cfg(unix)]
fn open_append(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    // Children must not inherit the log. std already asks for O_CLOEXEC, but
    // we'd rather not depend on that.
    OpenOptions::new()
        .create(true)
        .append(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(path)
}

#[cfg(not(unix))]
fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Failing to write the event log never fails the call being logged, so every
/// write result in here is deliberately dropped.
#[derive(Debug)]
pub struct MemLog {
    sink: Sink,
    mirror: MirrorConfig,
    path: Option<PathBuf>,
}

impl MemLog {
    pub fn detached(mirror: MirrorConfig) -> Self {
        Self {
            sink: Sink::Discard,
            mirror,
            path: None,
        }
    }

    pub fn to_writer(writer: Box<dyn Write>, mirror: MirrorConfig) -> Self {
        Self {
            sink: Sink::Writer(writer),
            mirror,
            path: None,
        }
    }

    /// Open the destination `config` asks for. If the file can't be opened we
    /// say so through `log` and fall back to stderr.
    pub fn open(program: &str, config: &MemCheckConfig) -> Self {
        if config.console_only {
            return Self {
                sink: Sink::Stderr,
                mirror: config.mirror,
                path: None,
            };
        }
        let path = log_path(&config.log_dir, program, std::process::id());
        match open_append(&path) {
            Ok(file) => {
                let mut log = Self {
                    sink: Sink::File(LineWriter::new(file)),
                    mirror: config.mirror,
                    path: Some(path),
                };
                log.blank();
                log
            }
            Err(e) => {
                warn!(target: MIRROR_TARGET, "unable to open {} for appending: {e}", path.display());
                Self {
                    sink: Sink::Stderr,
                    mirror: config.mirror,
                    path: None,
                }
            }
        }
    }

    /// The file we are appending to, if we are appending to a file
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.sink, Sink::Discard)
    }

    /// A timestamped event line, mirrored to `log` if its class is enabled
    pub fn event(&mut self, class: EventClass, args: fmt::Arguments<'_>) {
        _ = writeln!(self.sink, "{}{}", timestamp(), args);
        if class.mirrored_by(&self.mirror) {
            if class == EventClass::Anomaly {
                warn!(target: MIRROR_TARGET, "{args}");
            } else {
                info!(target: MIRROR_TARGET, "{args}");
            }
        }
    }

    /// A plain line: report bodies and continuation lines
    pub fn line(&mut self, args: fmt::Arguments<'_>) {
        _ = writeln!(self.sink, "{args}");
    }

    pub fn blank(&mut self) {
        _ = writeln!(self.sink);
    }

    /// Raw access, for things like hex dumps that format themselves
    pub fn writer(&mut self) -> &mut dyn Write {
        &mut self.sink
    }

    pub fn flush(&mut self) {
        _ = self.sink.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SharedBuf;

    #[test]
    fn path_has_program_and_pid() {
        let path = log_path(Path::new("/tmp"), "prober", 4242);
        assert_eq!(path, PathBuf::from("/tmp/prober_mem.4242.log"));
    }

    #[test]
    fn events_are_timestamped_lines_are_not() {
        let buf = SharedBuf::new();
        let mut log = MemLog::to_writer(Box::new(buf.clone()), MirrorConfig::default());
        log.event(EventClass::Allocation, format_args!("zalloc thing"));
        log.line(format_args!("plain"));
        let text = buf.contents();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let (stamp, rest) = lines[0].split_at(TIME_STR_LEN);
        assert_eq!(stamp.len(), 9);
        assert_eq!(stamp.as_bytes()[2], b':');
        assert_eq!(rest, "zalloc thing");
        assert_eq!(lines[1], "plain");
    }

    #[test]
    fn file_destination_appends() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemCheckConfig::default().with_log_dir(dir.path());
        let mut log = MemLog::open("appender", &config);
        let path = log.path().unwrap().to_path_buf();
        log.line(format_args!("first"));
        drop(log);
        let mut log = MemLog::open("appender", &config);
        log.line(format_args!("second"));
        drop(log);
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "\nfirst\n\nsecond\n");
    }

    #[test]
    fn unopenable_file_falls_back_to_stderr() {
        let config = MemCheckConfig::default().with_log_dir("/nonexistent/really/not/here");
        let log = MemLog::open("nowhere", &config);
        assert!(log.path().is_none());
        assert!(matches!(log.sink, Sink::Stderr));
    }

    #[test]
    fn discard_sink_swallows_everything() {
        let mut log = MemLog::detached(MirrorConfig::all());
        assert!(log.is_detached());
        log.event(EventClass::Anomaly, format_args!("nobody hears this"));
    }
}
