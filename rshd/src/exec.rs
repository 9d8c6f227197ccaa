//! Pipeline execution: in-process fast path, or one child per stage.

use std::env;
use std::ffi::CString;
use std::io::{self, Read, Write};
use std::os::fd::IntoRawFd;
use std::os::unix::io::{AsRawFd, RawFd};

use nix::errno::Errno;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, dup2, execvpe, fork, pipe, ForkResult, Pid};

use crate::error::ExecError;
use crate::lineio::FdReader;
use crate::pipeline::{Pipeline, Redirect, Stage, StageKind};
use crate::registry::{Context, Outcome, TERMINATE_SENTINEL};
use crate::session::Host;

pub const LISTENER_PID_ENV: &str = "SESSION_LISTENER_PID";
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Child status when the redirect target cannot be opened.
pub const REDIRECT_FAILED: i32 = 126;
/// Child status when the program cannot be executed.
pub const EXEC_FAILED: i32 = 127;

pub struct Executor<'h> {
    host: &'h Host,
}

impl<'h> Executor<'h> {
    pub fn new(host: &'h Host) -> Self {
        Executor { host }
    }

    /// Run `pipeline` and reduce it to one outcome.
    ///
    /// A lone fast-path built-in runs here against `input`/`output`.
    /// Anything else is forked onto the process's standard descriptors after
    /// `output` is flushed.
    pub fn run(
        &self,
        pipeline: &Pipeline,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<Outcome, ExecError> {
        if let Some(handler) = pipeline.fast_path() {
            let outcome = {
                let mut ctx = Context { input, output: &mut *output, host: self.host };
                handler(&mut ctx, &pipeline.stages[0].argv)
            };
            output.flush()?;
            return Ok(outcome);
        }
        output.flush()?;
        self.spawn(pipeline)
    }

    fn spawn(&self, pipeline: &Pipeline) -> Result<Outcome, ExecError> {
        reap_strays();

        let programs = pipeline
            .stages
            .iter()
            .map(|stage| match stage.kind {
                StageKind::External => to_cstrings(&stage.argv).map(Some),
                StageKind::Builtin { .. } => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let envp = self.environment()?;

        let n = pipeline.stages.len();
        let mut pipes = Pipes::open(n - 1)?;
        let mut pids = Vec::with_capacity(n);
        tracing::debug!(stages = n, "spawning pipeline");

        for (i, stage) in pipeline.stages.iter().enumerate() {
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    let last = i + 1 == n;
                    let redirect = if last { pipeline.redirect.as_ref() } else { None };
                    self.run_stage(i, last, stage, programs[i].as_deref(), &envp, &pipes, redirect)
                }
                Ok(ForkResult::Parent { child }) => pids.push(child),
                Err(source) => {
                    // started stages finish on their own and are reaped later
                    pipes.close_all();
                    return Err(ExecError::Fork { stage: i, source });
                }
            }
        }
        pipes.close_all();

        let mut status = 0;
        let mut terminate = false;
        for (pid, stage) in pids.into_iter().zip(&pipeline.stages) {
            status = wait_exit(pid)?;
            if stage.is_builtin() && status == TERMINATE_SENTINEL {
                terminate = true;
            }
        }
        Ok(if terminate { Outcome::TerminateSession } else { Outcome::Continue(status) })
    }

    fn environment(&self) -> Result<Vec<CString>, ExecError> {
        let path = env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        Ok(vec![
            CString::new(format!("PATH={path}"))?,
            CString::new("TERM=dumb")?,
            CString::new(format!("{LISTENER_PID_ENV}={}", self.host.listener_pid))?,
        ])
    }

    #[allow(clippy::too_many_arguments)]
    fn run_stage(
        &self,
        index: usize,
        last: bool,
        stage: &Stage,
        program: Option<&[CString]>,
        envp: &[CString],
        pipes: &Pipes,
        redirect: Option<&Redirect>,
    ) -> ! {
        if index > 0 && dup2(pipes.read_end(index - 1), libc::STDIN_FILENO).is_err() {
            std::process::exit(REDIRECT_FAILED);
        }
        if !last && dup2(pipes.write_end(index), libc::STDOUT_FILENO).is_err() {
            std::process::exit(REDIRECT_FAILED);
        }
        if let Some(redirect) = redirect {
            let wired = redirect.open().and_then(|file| {
                dup2(file.as_raw_fd(), libc::STDOUT_FILENO).map_err(io::Error::from)
            });
            if let Err(e) = wired {
                eprintln!("error: {}: {e}", redirect.path.display());
                std::process::exit(REDIRECT_FAILED);
            }
        }
        pipes.close_in_child();
        unsafe {
            let _ = signal(Signal::SIGPIPE, SigHandler::SigDfl);
        }

        match (stage.kind, program) {
            (StageKind::Builtin { handler, .. }, _) => {
                let mut input = FdReader::stdin();
                let mut output = io::stdout();
                let outcome = {
                    let mut ctx = Context {
                        input: &mut input,
                        output: &mut output,
                        host: self.host,
                    };
                    handler(&mut ctx, &stage.argv)
                };
                let _ = output.flush();
                std::process::exit(outcome.exit_code())
            }
            (StageKind::External, Some(argv)) => {
                let err = match execvpe(&argv[0], argv, envp) {
                    Err(e) => e,
                    Ok(never) => match never {},
                };
                eprintln!("exec failed: {}: {err}", stage.name());
                std::process::exit(EXEC_FAILED)
            }
            (StageKind::External, None) => std::process::exit(EXEC_FAILED),
        }
    }
}

/// The N-1 pipes of an N-stage pipeline, as raw descriptors.
struct Pipes {
    fds: Vec<(RawFd, RawFd)>,
}

impl Pipes {
    fn open(count: usize) -> Result<Self, ExecError> {
        let mut pipes = Pipes { fds: Vec::with_capacity(count) };
        for _ in 0..count {
            let (r, w) = pipe().map_err(ExecError::Pipe)?;
            pipes.fds.push((r.into_raw_fd(), w.into_raw_fd()));
        }
        Ok(pipes)
    }

    fn read_end(&self, i: usize) -> RawFd {
        self.fds[i].0
    }

    fn write_end(&self, i: usize) -> RawFd {
        self.fds[i].1
    }

    fn close_all(&mut self) {
        for (r, w) in self.fds.drain(..) {
            let _ = close(r);
            let _ = close(w);
        }
    }

    /// Close this process's copies without touching bookkeeping; the child
    /// never returns to the coordinator.
    fn close_in_child(&self) {
        for &(r, w) in &self.fds {
            let _ = close(r);
            let _ = close(w);
        }
    }
}

impl Drop for Pipes {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn to_cstrings(argv: &[String]) -> Result<Vec<CString>, ExecError> {
    argv.iter().map(|a| CString::new(a.as_str()).map_err(ExecError::from)).collect()
}

/// Wait for one stage; signal deaths map to 128 + signal number.
fn wait_exit(pid: Pid) -> Result<i32, ExecError> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(128 + sig as i32),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(source) => return Err(ExecError::Wait { pid, source }),
        }
    }
}

/// Collect children left behind by an abandoned pipeline.
pub fn reap_strays() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => tracing::trace!(?status, "reaped stray child"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::pipeline::build;
    use crate::registry::{Command, Registry};
    use crate::token::tokenize;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);
    static CALLER: AtomicU32 = AtomicU32::new(0);

    fn count(ctx: &mut Context<'_>, _: &[String]) -> Outcome {
        CALLS.fetch_add(1, Ordering::SeqCst);
        CALLER.store(std::process::id(), Ordering::SeqCst);
        let _ = write!(ctx.output, "called");
        Outcome::Continue(3)
    }

    fn quit(_: &mut Context<'_>, _: &[String]) -> Outcome {
        Outcome::TerminateSession
    }

    fn host() -> Host {
        let mut reg = Registry::new();
        reg.insert("count", Command::BuiltinFastPath(count), "")
            .insert("quit", Command::BuiltinFastPath(quit), "");
        Host::new(reg, ServerConfig::default(), Pid::this())
    }

    #[test]
    fn fast_path_stays_in_process() {
        let host = host();
        let exec = Executor::new(&host);
        let pipeline = build(tokenize("count"), &host.registry).unwrap();
        for _ in 0..3 {
            let mut out = Vec::new();
            let outcome = exec.run(&pipeline, &mut Cursor::new(Vec::new()), &mut out).unwrap();
            assert_eq!(outcome, Outcome::Continue(3));
            assert_eq!(out, b"called");
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 3);
        assert_eq!(CALLER.load(Ordering::SeqCst), std::process::id());
    }

    #[test]
    fn fast_path_terminate_is_returned_directly() {
        let host = host();
        let pipeline = build(tokenize("quit"), &host.registry).unwrap();
        let mut out = Vec::new();
        let outcome = Executor::new(&host)
            .run(&pipeline, &mut Cursor::new(Vec::new()), &mut out)
            .unwrap();
        assert_eq!(outcome, Outcome::TerminateSession);
    }

    #[test]
    fn stage_environment_is_fixed() {
        let host = host();
        let envp = Executor::new(&host).environment().unwrap();
        let keys: Vec<String> = envp
            .iter()
            .map(|c| c.to_str().unwrap().split('=').next().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["PATH", "TERM", LISTENER_PID_ENV]);
        assert_eq!(envp[2].to_str().unwrap(), format!("{LISTENER_PID_ENV}={}", std::process::id()));
    }
}
