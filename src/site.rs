use std::fmt;

use serde::Serialize;

/// Where in the host program a tracked call came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Site {
    pub file: &'static str,
    pub line: u32,
    /// Rust has no `__func__`, so this is whatever the caller chose: usually
    /// `module_path!()` via [`site!`](crate::site), or a function name.
    pub func: &'static str,
}

impl Site {
    pub const fn new(file: &'static str, line: u32, func: &'static str) -> Self {
        Self { file, line, func }
    }

    /// Used for records that have no call site of their own
    pub const fn unknown() -> Self {
        Self::new("?", 0, "?")
    }
}

/// Renders as `file, line, func`, which is the tail of every event line.
impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {:3}, {}", self.file, self.line, self.func)
    }
}

/// Capture the current call site. With no arguments, the function slot is
/// filled with `module_path!()`.
///
/// ```
/// let here = memcheck::site!("main");
/// assert_eq!(here.func, "main");
/// ```
#[macro_export]
macro_rules! site {
    () => {
        $crate::Site::new(file!(), line!(), module_path!())
    };
    ($func:expr) => {
        $crate::Site::new(file!(), line!(), $func)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_pads_the_line_number() {
        let site = Site::new("a.c", 7, "foo");
        assert_eq!(site.to_string(), "a.c,   7, foo");
    }

    #[test]
    fn macro_picks_up_this_file() {
        let site = crate::site!();
        assert!(site.file.ends_with("site.rs"));
        assert_eq!(site.func, module_path!());
    }
}
