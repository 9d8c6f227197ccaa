use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

/// Malformed command line. The whole line is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing path after '{op}'")]
    MissingRedirectTarget { op: &'static str },
    #[error("too many pipeline stages (max {max})")]
    TooManyStages { max: usize },
    #[error("empty pipeline")]
    EmptyPipeline,
}

/// Failure while setting up a pipeline. Stages that were not started yet are
/// never launched.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("pipe: {0}")]
    Pipe(#[source] Errno),
    #[error("fork of stage {stage} failed: {source}")]
    Fork {
        stage: usize,
        #[source]
        source: Errno,
    },
    #[error("wait for pid {pid} failed: {source}")]
    Wait {
        pid: Pid,
        #[source]
        source: Errno,
    },
    #[error("argument contains a NUL byte")]
    Nul(#[from] std::ffi::NulError),
    #[error("session output: {0}")]
    Io(#[from] io::Error),
}

/// Fatal supervisor startup/serving error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("already running (pid={pid}); use --force to replace it")]
    AlreadyRunning { pid: Pid },
    #[error("existing instance pid={pid} did not exit in time")]
    TakeoverTimedOut { pid: Pid },
    #[error("cannot signal pid={pid}: {source}")]
    Signal {
        pid: Pid,
        #[source]
        source: Errno,
    },
    #[error("bind {addr} failed after {attempts} attempt(s): {source}")]
    Bind {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("instance record {}: {source}", .path.display())]
    Record {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("daemonize: {0}")]
    Daemonize(#[source] Errno),
    #[error("install signal handlers: {0}")]
    SignalSetup(#[source] Errno),
    #[error("listener: {0}")]
    Listener(#[source] io::Error),
}
