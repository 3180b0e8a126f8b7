//! Terminal and `general.log` logging.
//!
//! The bundle directory only exists once the instance identity is known, but
//! everything logged before that belongs in `general.log` too. [`GeneralLog`]
//! buffers records until it is attached to a file, and drops them once it is
//! detached so the archive step never races a writer.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

enum SinkState {
    Buffering(Vec<u8>),
    Attached(BufWriter<File>),
    Closed,
}

/// Deferred log sink backing `general.log`.
#[derive(Clone)]
pub struct GeneralLog {
    state: Arc<Mutex<SinkState>>,
}

impl Default for GeneralLog {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneralLog {
    pub fn new() -> Self {
        GeneralLog {
            state: Arc::new(Mutex::new(SinkState::Buffering(Vec::new()))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start writing to `path`, flushing everything buffered so far.
    pub fn attach(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        let file = File::create(path)
            .context(format!("Failed to create log file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        if let SinkState::Buffering(buffer) = &*state {
            writer.write_all(buffer).context("Failed to write buffered log")?;
        }
        *state = SinkState::Attached(writer);
        Ok(())
    }

    /// Flush and close the file; later records are discarded
    pub fn detach(&self) -> Result<()> {
        let mut state = self.lock();
        if let SinkState::Attached(writer) = &mut *state {
            writer.flush().context("Failed to flush general log")?;
        }
        *state = SinkState::Closed;
        Ok(())
    }
}

impl Write for GeneralLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut *self.lock() {
            SinkState::Buffering(buffer) => {
                buffer.extend_from_slice(buf);
                Ok(buf.len())
            }
            SinkState::Attached(writer) => writer.write(buf),
            SinkState::Closed => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut *self.lock() {
            SinkState::Attached(writer) => writer.flush(),
            _ => Ok(()),
        }
    }
}

/// Terminal level for a `-v` count
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initialize logging to the terminal and to `general_log`.
///
/// `general.log` always gets at least debug detail.
pub fn initialize_logging(verbosity: u8, general_log: GeneralLog) -> Result<()> {
    let level = level_for_verbosity(verbosity);
    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(level.max(LevelFilter::Debug), Config::default(), general_log),
    ])
    .context("Failed to initialize logger")?;
    Ok(())
}
