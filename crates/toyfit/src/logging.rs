use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILE_NAME: &str = "toyfit.log";
const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024; // 5MB
const KEEP_SIZE: u64 = 1024 * 1024; // 1MB

/// Trim the log file to its last `KEEP_SIZE` bytes once it grows past `MAX_LOG_SIZE`
fn rotate_log_if_needed(log_path: &Path) -> io::Result<()> {
    let Ok(metadata) = fs::metadata(log_path) else {
        return Ok(());
    };
    if metadata.len() <= MAX_LOG_SIZE {
        return Ok(());
    }

    let mut file = File::open(log_path)?;
    file.seek(SeekFrom::Start(metadata.len() - KEEP_SIZE))?;
    let mut tail = Vec::with_capacity(KEEP_SIZE as usize);
    file.read_to_end(&mut tail)?;

    // Restart on a line boundary
    let start = tail
        .iter()
        .position(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    fs::write(log_path, &tail[start..])
}

/// Shared handle on the log file, one writer per event
#[derive(Clone)]
struct LogFile(Arc<Mutex<File>>);

impl LogFile {
    fn lock(&self) -> MutexGuard<'_, File> {
        // A panic mid-write leaves the file usable
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct LogWriter<'a>(MutexGuard<'a, File>);

impl Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.lock())
    }
}

/// Log to `<data_dir>/toyfit.log` and to stderr.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(data_dir: &Path, level: &str) -> color_eyre::Result<()> {
    fs::create_dir_all(data_dir)?;
    let log_path = data_dir.join(LOG_FILE_NAME);
    rotate_log_if_needed(&log_path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let log_file = LogFile(Arc::new(Mutex::new(file)));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("toyfit={level},toyfit_core={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(log_file).with_ansi(false))
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();

    tracing::debug!(path = %log_path.display(), "Logging initialized");
    Ok(())
}
