//! Operator-facing console output
//!
//! Everything shown to the operator is also recorded in the session log, so
//! the archived logs tell the whole story of a run.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

const MARGIN: &str = "   | ";

struct ConsoleState {
    out: Box<dyn Write + Send>,
    last_is_space: bool,
    partial: String,
}

/// Shared handle to the operator console
#[derive(Clone)]
pub struct Console {
    state: Arc<Mutex<ConsoleState>>,
}

impl Default for Console {
    fn default() -> Self {
        Self::stdout()
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Console {
    pub fn stdout() -> Self {
        Self::with_writer(io::stdout())
    }

    pub fn with_writer(out: impl Write + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConsoleState {
                out: Box::new(out),
                last_is_space: false,
                partial: String::new(),
            })),
        }
    }

    /// Console writing into an in-memory buffer, for tests
    pub fn buffered() -> (Self, ConsoleBuffer) {
        let buffer = ConsoleBuffer::default();
        (Self::with_writer(buffer.clone()), buffer)
    }

    fn lock(&self) -> MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn title(&self, text: &str) {
        info!("Console title: [{}]", text);
        let mut state = self.lock();
        if !state.last_is_space {
            let _ = writeln!(state.out);
        }
        let _ = writeln!(state.out, "  == {}", text);
        let _ = writeln!(state.out);
        state.last_is_space = true;
    }

    /// Print a spacing line unless the previous output already was one
    pub fn space(&self) {
        let mut state = self.lock();
        if !state.last_is_space {
            let _ = writeln!(state.out, "{}", MARGIN);
            state.last_is_space = true;
        }
    }

    pub fn msg(&self, text: &str) {
        info!("Console message: [{}]", text);
        self.print(text);
    }

    fn print(&self, text: &str) {
        let mut state = self.lock();
        let _ = writeln!(state.out, "{}{}", MARGIN, text);
        state.last_is_space = false;
    }

    /// Start a line that is written in several pieces, e.g. `Label... OK`
    ///
    /// The line is terminated and logged when the returned guard is dropped.
    pub fn line(&self) -> ConsoleLine<'_> {
        let mut state = self.lock();
        let _ = write!(state.out, "{}", MARGIN);
        let _ = state.out.flush();
        ConsoleLine { console: self }
    }
}

/// An open console line; see [`Console::line`]
pub struct ConsoleLine<'a> {
    console: &'a Console,
}

impl ConsoleLine<'_> {
    pub fn send(&self, text: &str) {
        let mut state = self.console.lock();
        let _ = write!(state.out, "{}", text);
        let _ = state.out.flush();
        state.partial.push_str(text);
    }
}

impl Drop for ConsoleLine<'_> {
    fn drop(&mut self) {
        let mut state = self.console.lock();
        let _ = writeln!(state.out);
        let message = std::mem::take(&mut state.partial);
        state.last_is_space = false;
        drop(state);
        info!("Console message: [{}]", message);
    }
}

/// Cloneable in-memory sink capturing console output
#[derive(Clone, Default)]
pub struct ConsoleBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl ConsoleBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for ConsoleBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
