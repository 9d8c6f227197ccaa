//! One connection's read → parse → execute loop.

use std::io::{self, Read, Write};

use nix::unistd::Pid;

use crate::config::ServerConfig;
use crate::exec::Executor;
use crate::lineio::{read_line, MAX_LINE};
use crate::pipeline;
use crate::registry::{Outcome, Registry};
use crate::token::tokenize;

/// State shared by every session a listener hands out.
#[derive(Debug, Clone)]
pub struct Host {
    pub registry: Registry,
    pub config: ServerConfig,
    /// The listening supervisor, as seen by control built-ins and
    /// external programs (`SESSION_LISTENER_PID`).
    pub listener_pid: Pid,
}

impl Host {
    pub fn new(registry: Registry, config: ServerConfig, listener_pid: Pid) -> Self {
        Host { registry, config, listener_pid }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    Terminated,
}

pub const PROMPT: &str = "$ ";

/// A line-oriented shell session over `input`/`output`.
///
/// Pipelines that need child processes run against the process's standard
/// descriptors, so in a connection handler `input` and `output` must be
/// fds 0 and 1.
pub struct Session<'h, R, W> {
    host: &'h Host,
    input: R,
    output: W,
}

impl<'h, R: Read, W: Write> Session<'h, R, W> {
    pub fn new(host: &'h Host, input: R, output: W) -> Self {
        Session { host, input, output }
    }

    pub fn greet(&mut self, peer: &str) -> io::Result<()> {
        write!(self.output, "rshd (unencrypted) - remote {peer}\nType 'help' for builtins.\n")?;
        self.output.flush()
    }

    pub fn run(&mut self) -> io::Result<SessionEnd> {
        let executor = Executor::new(self.host);
        loop {
            self.output.write_all(PROMPT.as_bytes())?;
            self.output.flush()?;

            let line = match read_line(&mut self.input, MAX_LINE) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(SessionEnd::PeerClosed),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    writeln!(self.output, "error: line too long (max {MAX_LINE} bytes)")?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let pipeline = match pipeline::build(tokenize(line), &self.host.registry) {
                Ok(p) => p,
                Err(e) => {
                    writeln!(self.output, "parse error: {e}")?;
                    continue;
                }
            };
            match executor.run(&pipeline, &mut self.input, &mut self.output) {
                Ok(Outcome::TerminateSession) => return Ok(SessionEnd::Terminated),
                Ok(Outcome::Continue(status)) => tracing::trace!(status, "pipeline finished"),
                Err(e) => writeln!(self.output, "error: {e}")?,
            }
        }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }
}
