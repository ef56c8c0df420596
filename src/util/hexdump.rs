use std::{
    fmt,
    io::{self, Write},
};

use serde::Serialize;

const ROW: usize = 16;

/// A copy of some bytes, for putting in a log. `Debug` gives the compact
/// `[a5 5a ..]` form, [`HexDump::write_rows()`] the classic offset/hex/ASCII
/// table.
#[derive(Serialize, Clone, PartialEq)]
pub struct HexDump {
    buf: Vec<u8>,
}

impl HexDump {
    pub const fn new(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write 16 bytes per line, each line indented by `indent` spaces:
    ///
    /// ```plaintext
    ///          0000  48 65 6c 6c 6f 00 00 00  5a 5a a5 a5 ...   Hello...ZZ..
    /// ```
    pub fn write_rows<W: Write + ?Sized>(&self, w: &mut W, indent: usize) -> io::Result<()> {
        for (row, chunk) in self.buf.chunks(ROW).enumerate() {
            write!(w, "{:indent$}{:04x} ", "", row * ROW)?;
            for i in 0..ROW {
                if i == ROW / 2 {
                    write!(w, " ")?;
                }
                match chunk.get(i) {
                    Some(b) => write!(w, " {b:02x}")?,
                    None => write!(w, "   ")?,
                }
            }
            write!(w, "   ")?;
            for &b in chunk {
                let c = if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                };
                write!(w, "{c}")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HexDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for i in 0..self.buf.len() {
            write!(f, "{:x}", self.buf[i])?;
            if i + 1 != self.buf.len() {
                write!(f, " ")?;
            }
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_have_offsets_and_ascii() {
        let mut bytes = b"Hello".to_vec();
        bytes.extend([0u8; 15]);
        let mut out = Vec::new();
        HexDump::new(bytes).write_rows(&mut out, 2).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  0000  48 65 6c 6c 6f"));
        assert!(lines[0].ends_with("Hello..........."));
        assert!(lines[1].starts_with("  0010  00 00 00 00"));
    }

    #[test]
    fn debug_is_compact() {
        assert_eq!(format!("{:?}", HexDump::from_slice(&[0xa5, 0x5a, 1])), "[a5 5a 1]");
    }
}
