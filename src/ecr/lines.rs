//! Reassembles journal lines from arbitrarily chunked serial reads.

use tracing::warn;

/// A partial line longer than this is link garbage, not a journal line.
pub const MAX_LINE_BYTES: usize = 1024;

#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every line completed by them, with
    /// `\n` and any trailing `\r` removed.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.buf);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                lines.push(line);
            } else {
                self.buf.push(byte);
                // Prevent the buffer from growing unbounded on a runaway line
                if self.buf.len() > MAX_LINE_BYTES {
                    warn!(
                        bytes = self.buf.len(),
                        "Discarding unterminated journal line"
                    );
                    self.buf.clear();
                }
            }
        }
        lines
    }

    /// Bytes received since the last line break.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut asm = LineAssembler::new();
        assert!(asm.push(b"01/01/20").is_empty());
        let lines = asm.push(b"24 09:00\r\nCOFF");
        assert_eq!(lines, vec![b"01/01/2024 09:00".to_vec()]);
        assert_eq!(asm.pending(), b"COFF");
        let lines = asm.push(b"EE\xa32.50\nTOTAL\xa32.50\n");
        assert_eq!(
            lines,
            vec![b"COFFEE\xa32.50".to_vec(), b"TOTAL\xa32.50".to_vec()]
        );
        assert!(asm.pending().is_empty());
    }

    #[test]
    fn test_empty_lines_are_kept() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push(b"\n\r\n"), vec![Vec::<u8>::new(), Vec::new()]);
    }

    #[test]
    fn test_runaway_line_is_discarded() {
        let mut asm = LineAssembler::new();
        asm.push(&vec![b'x'; MAX_LINE_BYTES + 1]);
        assert!(asm.pending().is_empty());
        assert_eq!(asm.push(b"CASH\n"), vec![b"CASH".to_vec()]);
    }
}
