/// Reassembles log lines from arbitrarily chunked bytes.
///
/// A line ends at `\n`, at `\r` (container runtimes use carriage returns to
/// overwrite a line) or at `\r\n`, which counts as a single terminator even
/// when the chunk boundary falls between the two bytes. Bytes are decoded
/// only once a line is complete, so multi-byte characters may be split
/// across chunks.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
    after_cr: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk and return every line it completed, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\n' | b'\r' => {
                    lines.push(self.take_line());
                    self.after_cr = byte == b'\r';
                }
                _ => {
                    self.after_cr = false;
                    self.partial.push(byte);
                }
            }
        }

        lines
    }

    /// Flush the unterminated remainder at end of stream
    pub fn finish(&mut self) -> Option<String> {
        self.after_cr = false;
        if self.partial.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    /// Bytes of the line currently being assembled
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }
}
