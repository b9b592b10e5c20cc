use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::CapturedOutput;

const READ_CHUNK: usize = 8192;

/// Collects a child's piped stdout and stderr on background tasks.
///
/// Buffers are shared so that whatever arrived before a drain timeout is kept.
pub struct OutputCapture {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self {
            stdout: Arc::new(Mutex::new(Vec::new())),
            stderr: Arc::new(Mutex::new(Vec::new())),
            tasks: Vec::new(),
        }
    }

    /// Take the child's stdout/stderr pipes and start draining them
    pub fn attach(&mut self, child: &mut Child) {
        if let Some(stdout) = child.stdout.take() {
            self.tasks
                .push(spawn_drain(stdout, Arc::clone(&self.stdout), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            self.tasks
                .push(spawn_drain(stderr, Arc::clone(&self.stderr), "stderr"));
        }
    }

    /// Whatever has been captured so far
    pub fn snapshot(&self) -> CapturedOutput {
        CapturedOutput {
            stdout: self.stdout.lock().clone(),
            stderr: self.stderr.lock().clone(),
        }
    }

    /// Wait for both pipes to reach EOF, bounded by `drain_timeout`.
    ///
    /// Pipes stay open as long as any process holding them lives (sshfs hands
    /// its stderr to the ssh child), so a stuck drain is abandoned rather than
    /// awaited forever.
    pub async fn finish(mut self, drain_timeout: Duration) -> CapturedOutput {
        let deadline = Instant::now() + drain_timeout;
        for task in &mut self.tasks {
            if timeout_at(deadline, &mut *task).await.is_err() {
                warn!(
                    "Output pipes still open after {:?}, keeping partial capture",
                    drain_timeout
                );
                task.abort();
            }
        }
        self.snapshot()
    }
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn spawn_drain<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>, name: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("Captured {} reached EOF", name);
                    break;
                }
                Ok(n) => sink.lock().extend_from_slice(&buf[..n]),
                Err(e) => {
                    warn!("Failed to read captured {}: {}", name, e);
                    break;
                }
            }
        }
    })
}
