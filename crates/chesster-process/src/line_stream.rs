use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;

use crate::launcher::{OutputLine, OutputStream};

const READ_CHUNK_BYTES: usize = 4096;

/// Incremental splitter that turns arbitrary byte chunks into complete, trimmed lines.
///
/// Bytes after the last `\n` of a chunk are held until a later chunk completes
/// them, so multi-byte characters and lines spanning chunk boundaries survive.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_trimmed(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Returns the buffered fragment once the stream has ended, if it holds any text.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        let line = decode_trimmed(&raw);
        (!line.is_empty()).then_some(line)
    }

    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_trimmed(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Reads `reader` to EOF, forwarding each completed line tagged with `stream`.
///
/// Returns the number of lines forwarded. Stops early if the receiving side is gone.
pub async fn pump_lines<R>(
    mut reader: R,
    stream: OutputStream,
    sender: UnboundedSender<OutputLine>,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::new();
    let mut buffer = vec![0_u8; READ_CHUNK_BYTES];
    let mut forwarded = 0_usize;
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) => {
                tracing::debug!(stream = stream.as_str(), %error, "child pipe read failed");
                break;
            }
        };
        for text in splitter.push(&buffer[..read]) {
            if sender.send(OutputLine { stream, text }).is_err() {
                return forwarded;
            }
            forwarded += 1;
        }
    }
    if let Some(text) = splitter.finish() {
        if sender.send(OutputLine { stream, text }).is_ok() {
            forwarded += 1;
        }
    }
    forwarded
}
