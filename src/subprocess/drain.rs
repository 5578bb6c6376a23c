//! Live, loss-free consumption of process output
//!
//! Each stream of a launched process is read by a background task that
//! forwards raw lines, terminators included, into a channel. A [`LineDrain`]
//! pulls from that channel while consulting the shared [`ProcessHandle`] for
//! liveness, and mirrors every line it yields into an [`ArtifactWriter`].

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::error::ProcessError;
use super::runner::{BoxedReader, ChildProcess, ExitStatus};
use super::StreamName;

/// Shared view of a running process
///
/// A monitor task owns the child and publishes its exit status once, so any
/// number of handles can check liveness without blocking each other.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    status: watch::Receiver<Option<ExitStatus>>,
    kill: Arc<Notify>,
}

impl ProcessHandle {
    pub fn monitor(mut child: Box<dyn ChildProcess>) -> Self {
        let pid = child.id();
        let (status_tx, status_rx) = watch::channel(None);
        let kill = Arc::new(Notify::new());
        let kill_requested = Arc::clone(&kill);

        tokio::spawn(async move {
            let result = tokio::select! {
                status = child.wait() => status,
                _ = kill_requested.notified() => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to terminate process {:?}: {}", pid, e);
                    }
                    child.wait().await
                }
            };
            let status = result.unwrap_or_else(|e| {
                error!("Failed waiting for process {:?}: {}", pid, e);
                ExitStatus::Error(-1)
            });
            let _ = status_tx.send(Some(status));
        });

        Self {
            pid,
            status: status_rx,
            kill,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status if the process has terminated
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.status.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    pub async fn wait(&self) -> Result<ExitStatus, ProcessError> {
        let mut status = self.status.clone();
        let published = status
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ProcessError::Io(std::io::Error::other("process monitor stopped")))?;
        (*published)
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("process status missing")))
    }

    /// Wait up to `timeout`; `None` means the process is still running
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<Option<ExitStatus>, ProcessError> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Request termination; a no-op once the process has exited
    pub fn kill(&self) {
        if !self.has_exited() {
            self.kill.notify_one();
        }
    }
}

/// Mirrors the lines of one stream into a session artifact file
///
/// The file is created on the first line and never reopened, so a stream
/// that produced nothing leaves no file behind.
pub struct ArtifactWriter {
    path: PathBuf,
    file: Option<File>,
    bytes_written: u64,
}

impl ArtifactWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            bytes_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if self.file.is_none() {
            self.file = Some(File::create(&self.path)?);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)?;
            self.bytes_written += bytes.len() as u64;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.file {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

type LineResult = std::io::Result<Vec<u8>>;

/// Live sequence of output lines of one process stream
///
/// Lines are yielded verbatim, terminator included, as soon as they are
/// available. The sequence ends only once no more data can arrive: either
/// the stream was closed, or the process has exited and a second look
/// after a short pause still found nothing.
pub struct LineDrain {
    stream: StreamName,
    lines: mpsc::UnboundedReceiver<LineResult>,
    reader: JoinHandle<()>,
    process: ProcessHandle,
    artifact: ArtifactWriter,
    poll_interval: Duration,
    cancel: CancellationToken,
    exhausted: bool,
}

impl LineDrain {
    pub fn new(
        stream: StreamName,
        source: BoxedReader,
        process: ProcessHandle,
        artifact: ArtifactWriter,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(Self::forward_lines(source, tx));
        Self {
            stream,
            lines: rx,
            reader,
            process,
            artifact,
            poll_interval,
            cancel,
            exhausted: false,
        }
    }

    async fn forward_lines(source: BoxedReader, tx: mpsc::UnboundedSender<LineResult>) {
        let mut reader = BufReader::new(source);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    }

    pub fn stream(&self) -> StreamName {
        self.stream
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn bytes_written(&self) -> u64 {
        self.artifact.bytes_written()
    }

    pub fn artifact_path(&self) -> &Path {
        self.artifact.path()
    }

    /// Next line of output, or `None` once the stream is exhausted
    pub async fn next_line(&mut self) -> Result<Option<String>, ProcessError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut last_chance = false;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ProcessError::Interrupted);
            }

            // Liveness is sampled before reading, so a line written right
            // before exit is still picked up below
            let exited = self.process.has_exited();

            match self.lines.try_recv() {
                Ok(line) => return self.record(line).map(Some),
                Err(TryRecvError::Disconnected) => {
                    self.exhausted = true;
                    return Ok(None);
                }
                Err(TryRecvError::Empty) if exited => {
                    if last_chance {
                        debug!("{} drained after process exit", self.stream);
                        self.exhausted = true;
                        return Ok(None);
                    }
                    last_chance = true;
                }
                Err(TryRecvError::Empty) => {}
            }

            tokio::select! {
                received = self.lines.recv() => match received {
                    Some(line) => return self.record(line).map(Some),
                    None => {
                        self.exhausted = true;
                        return Ok(None);
                    }
                },
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel.cancelled() => return Err(ProcessError::Interrupted),
            }
        }
    }

    /// Consume the remaining lines, keeping them only in the artifact
    pub async fn drain(&mut self) -> Result<(), ProcessError> {
        while self.next_line().await?.is_some() {}
        Ok(())
    }

    /// Consume the remaining lines and return them
    pub async fn collect_lines(&mut self) -> Result<Vec<String>, ProcessError> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    pub(crate) fn flush(&mut self) -> std::io::Result<()> {
        self.artifact.flush()
    }

    fn record(&mut self, line: LineResult) -> Result<String, ProcessError> {
        let bytes = line?;
        self.artifact.write(&bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Drop for LineDrain {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
