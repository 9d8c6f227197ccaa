use std::fs::{File, OpenOptions};
use std::os::unix::io::{FromRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::dup3;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Descriptor behind the stderr sink, or -1 when logging to a file.
static PRIVATE_STDERR: AtomicI32 = AtomicI32::new(-1);

/// Install the global subscriber.
///
/// Without a log file, records go to a close-on-exec duplicate of the
/// current stderr: connection handlers later rebind fd 2 to the client
/// socket, and log lines must not follow it there.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (sink, ansi) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            (file, false)
        }
        None => (private_stderr()?, atty::is(atty::Stream::Stderr)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(Mutex::new(sink)).with_ansi(ansi))
        .try_init()
        .context("logging already initialised")?;
    Ok(())
}

fn private_stderr() -> Result<File> {
    let fd = fcntl(libc::STDERR_FILENO, FcntlArg::F_DUPFD_CLOEXEC(3)).context("dup stderr")?;
    PRIVATE_STDERR.store(fd, Ordering::SeqCst);
    // fresh descriptor owned by nothing else
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Point the stderr sink at `target`, keeping it close-on-exec. A daemon
/// calls this once its standard streams are detached so log lines stop
/// reaching the caller.
pub fn redirect_stderr_sink(target: RawFd) -> nix::Result<()> {
    let fd = PRIVATE_STDERR.load(Ordering::SeqCst);
    if fd >= 0 {
        dup3(target, fd, OFlag::O_CLOEXEC)?;
    }
    Ok(())
}
