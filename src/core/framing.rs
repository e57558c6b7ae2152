/// Splits an inbound byte stream into `\n`-terminated lines.
///
/// Partial input is buffered across calls. The delimiter is removed, as is a
/// `\r` directly before it. Invalid UTF-8 is replaced rather than rejected.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self { buffer: Vec::with_capacity(1024) }
    }

    /// Feed bytes, returning every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                lines.push(Self::decode(&self.buffer));
                self.buffer.clear();
            } else {
                self.buffer.push(byte);
            }
        }

        lines
    }

    /// Take the unterminated remainder, if any
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = Self::decode(&self.buffer);
        self.buffer.clear();
        Some(line)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn decode(raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}
