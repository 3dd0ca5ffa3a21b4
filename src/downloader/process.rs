//! Subprocess plumbing for the extractor drivers.
//!
//! Extractors rewrite their progress line with carriage returns when the
//! output is a terminal; piped output keeps those `\r` separators, so
//! plain `lines()` would sit on a partial line. [`RecordReader`] yields
//! records delimited by `\n` or `\r`, and [`spawn_process_waiter`] binds
//! the child's lifetime to a cancellation token.

use std::io;

use tokio::io::{AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Reads an async stream and yields text records delimited by `\n` or `\r`.
pub struct RecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    /// Returns the next record, skipping empty ones. `None` on EOF.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(idx) = find_delimiter(&self.pending) {
                let record_bytes: Vec<u8> = self.pending.drain(..idx).collect();
                consume_delimiters(&mut self.pending);

                let record = String::from_utf8_lossy(&record_bytes).trim().to_string();
                if record.is_empty() {
                    continue;
                }
                return Ok(Some(record));
            }

            let n = tokio::io::AsyncReadExt::read(&mut self.reader, &mut self.scratch).await?;
            if n == 0 {
                let record = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();

                if record.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(record));
            }

            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| matches!(b, b'\n' | b'\r'))
}

fn consume_delimiters(buf: &mut Vec<u8>) {
    let n = buf
        .iter()
        .take_while(|&&b| matches!(b, b'\n' | b'\r'))
        .count();
    if n > 0 {
        buf.drain(..n);
    }
}

/// Wait for a child process on a dedicated task.
///
/// The receiver resolves to `Some(exit_code)` when the process exits on
/// its own, or `None` when the token fired first and the process was
/// killed.
pub fn spawn_process_waiter(
    mut child: Child,
    token: CancellationToken,
) -> oneshot::Receiver<Option<i32>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let exit_code = tokio::select! {
            _ = token.cancelled() => {
                let _ = child.kill().await;
                None
            }
            status = child.wait() => {
                match status {
                    Ok(exit_status) => {
                        let code = exit_status.code();
                        if let Some(c) = code {
                            if c != 0 {
                                warn!(code = c, "extractor process exited non-zero");
                            }
                        }
                        code
                    }
                    Err(e) => {
                        error!(error = %e, "error waiting for extractor process");
                        Some(-1)
                    }
                }
            }
        };
        let _ = tx.send(exit_code);
    });

    rx
}
