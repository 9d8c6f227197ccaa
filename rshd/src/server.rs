//! Listener supervisor: single-instance enforcement, takeover, bind retry,
//! daemonization, and one forked handler per connection.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use nix::fcntl::{open, OFlag};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, dup2, fork, setsid, ForkResult, Pid};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::instance::{self, InstanceRecord, InstanceStatus};
use crate::lineio::FdReader;
use crate::logging;
use crate::registry::Registry;
use crate::session::{Host, Session};

const ACCEPT_TICK: Duration = Duration::from_millis(250);

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_terminate(_: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

/// Result of [`Supervisor::launch`] in the calling process.
pub enum Launch {
    /// This process owns the listener and should call [`Supervisor::serve`].
    Serving(Supervisor),
    /// This process started a daemon with the given pid and has nothing left
    /// to do.
    Detached(Pid),
}

pub struct Supervisor {
    host: Host,
    listener: TcpListener,
    /// Present only when this process wrote the instance record.
    record: Option<InstanceRecord>,
}

impl Supervisor {
    /// Take the instance slot, bind, and optionally daemonize.
    pub fn launch(config: ServerConfig, registry: Registry) -> Result<Launch, ServerError> {
        let record = InstanceRecord::new(&config.pidfile);
        ensure_single_instance(&config, &record)?;
        let listener = bind_with_retry(&config)?;

        let record = if config.daemonize {
            if let Some(child) = daemonize()? {
                return Ok(Launch::Detached(child));
            }
            record.write(Pid::this()).map_err(|source| ServerError::Record {
                path: record.path().to_path_buf(),
                source,
            })?;
            Some(record)
        } else {
            None
        };

        install_signal_handlers()?;
        let host = Host::new(registry, config, Pid::this());
        Ok(Launch::Serving(Supervisor { host, listener, record }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until SIGTERM/SIGINT.
    pub fn serve(self) -> Result<(), ServerError> {
        self.listener.set_nonblocking(true).map_err(ServerError::Listener)?;
        let addr = self.local_addr().map_err(ServerError::Listener)?;
        tracing::info!(pid = Pid::this().as_raw(), %addr, "listening");

        while RUNNING.load(Ordering::SeqCst) {
            reap_handlers();
            match wait_readable(self.listener.as_raw_fd(), ACCEPT_TICK) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "poll on listener failed");
                    thread::sleep(ACCEPT_TICK);
                    continue;
                }
            }
            match self.listener.accept() {
                Ok((stream, peer)) => self.hand_off(stream, peer),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }

        tracing::info!(pid = Pid::this().as_raw(), "shutting down");
        let Supervisor { listener, record, .. } = self;
        drop(listener);
        if let Some(record) = record {
            match record.remove_if_owned(Pid::this()) {
                Ok(true) => {
                    tracing::debug!(path = %record.path().display(), "instance record removed")
                }
                Ok(false) => {
                    tracing::info!("instance record now belongs to another process; left in place")
                }
                Err(e) => tracing::warn!(error = %e, "cannot remove instance record"),
            }
        }
        Ok(())
    }

    fn hand_off(&self, stream: TcpStream, peer: SocketAddr) {
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let code = self.run_handler(stream, peer);
                std::process::exit(code)
            }
            Ok(ForkResult::Parent { child }) => {
                tracing::info!(pid = child.as_raw(), %peer, "connection accepted");
            }
            Err(e) => tracing::warn!(%peer, error = %e, "cannot fork connection handler"),
        }
    }

    /// Body of a connection handler process.
    fn run_handler(&self, stream: TcpStream, peer: SocketAddr) -> i32 {
        let _ = close(self.listener.as_raw_fd());
        restore_default_signals();
        if stream.set_nonblocking(false).is_err() {
            return 1;
        }
        let fd = stream.as_raw_fd();
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if dup2(fd, target).is_err() {
                return 1;
            }
        }
        drop(stream);

        let mut session = Session::new(&self.host, FdReader::stdin(), io::stdout());
        if session.greet(&peer.ip().to_string()).is_err() {
            return 0;
        }
        match session.run() {
            Ok(end) => tracing::debug!(%peer, ?end, "session finished"),
            Err(e) => tracing::debug!(%peer, error = %e, "session aborted"),
        }
        0
    }
}

fn ensure_single_instance(
    config: &ServerConfig,
    record: &InstanceRecord,
) -> Result<(), ServerError> {
    let record_err = |source| ServerError::Record { path: record.path().to_path_buf(), source };
    match record.status().map_err(record_err)? {
        InstanceStatus::Absent => {
            if config.force {
                sweep_by_name(config);
            }
        }
        InstanceStatus::Stale(pid) => {
            tracing::info!(pid = pid.as_raw(), "removing stale instance record");
            record.remove().map_err(record_err)?;
        }
        InstanceStatus::Running(pid) if !config.force => {
            return Err(ServerError::AlreadyRunning { pid });
        }
        InstanceStatus::Running(pid) => {
            tracing::info!(pid = pid.as_raw(), "replacing running instance");
            let gone = instance::terminate(pid, config.takeover_timeout)
                .map_err(|source| ServerError::Signal { pid, source })?;
            if !gone {
                return Err(ServerError::TakeoverTimedOut { pid });
            }
            record.remove().map_err(record_err)?;
            thread::sleep(config.takeover_grace);
        }
    }
    Ok(())
}

fn sweep_by_name(config: &ServerConfig) {
    if !instance::sweep(&config.process_name, &[]).is_empty() {
        thread::sleep(config.sweep_grace);
    }
}

fn bind_with_retry(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = config.listen_addr();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpListener::bind(addr) {
            Ok(listener) => return Ok(listener),
            Err(e)
                if e.kind() == io::ErrorKind::AddrInUse
                    && config.force
                    && attempt < config.bind_attempts =>
            {
                tracing::warn!(%addr, attempt, "address in use; retrying");
                sweep_by_name(config);
                thread::sleep(config.bind_retry_delay);
            }
            Err(source) => return Err(ServerError::Bind { addr, attempts: attempt, source }),
        }
    }
}

/// Fork into the background. Returns the daemon's pid in the calling
/// process and `None` in the daemon.
fn daemonize() -> Result<Option<Pid>, ServerError> {
    match unsafe { fork() }.map_err(ServerError::Daemonize)? {
        ForkResult::Parent { child } => Ok(Some(child)),
        ForkResult::Child => {
            setsid().map_err(ServerError::Daemonize)?;
            let null = open("/dev/null", OFlag::O_RDWR, Mode::empty())
                .map_err(ServerError::Daemonize)?;
            for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
                dup2(null, target).map_err(ServerError::Daemonize)?;
            }
            logging::redirect_stderr_sink(null).map_err(ServerError::Daemonize)?;
            if null > libc::STDERR_FILENO {
                let _ = close(null);
            }
            Ok(None)
        }
    }
}

fn install_signal_handlers() -> Result<(), ServerError> {
    RUNNING.store(true, Ordering::SeqCst);
    // no SA_RESTART: poll must return early on a signal
    let action =
        SigAction::new(SigHandler::Handler(on_terminate), SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGTERM, Signal::SIGINT] {
        unsafe { sigaction(sig, &action) }.map_err(ServerError::SignalSetup)?;
    }
    Ok(())
}

fn restore_default_signals() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGTERM, Signal::SIGINT] {
        let _ = unsafe { sigaction(sig, &action) };
    }
}

fn reap_handlers() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => tracing::debug!(?status, "connection handler exited"),
        }
    }
}

fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn config(dir: &tempfile::TempDir, force: bool) -> ServerConfig {
        ServerConfig {
            pidfile: dir.path().join("rshd.pid"),
            force,
            process_name: "rshd-unit-none".to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn refuses_live_instance_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, false);
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let record = InstanceRecord::new(&cfg.pidfile);
        record.write(pid).unwrap();

        let err = ensure_single_instance(&cfg, &record).unwrap_err();
        assert!(matches!(err, ServerError::AlreadyRunning { pid: p } if p == pid));
        assert!(record.path().exists());

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn forced_takeover_terminates_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, true);
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let record = InstanceRecord::new(&cfg.pidfile);
        record.write(Pid::from_raw(child.id() as i32)).unwrap();

        ensure_single_instance(&cfg, &record).unwrap();
        assert!(!record.path().exists());
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn stale_record_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, false);
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().unwrap();
        let record = InstanceRecord::new(&cfg.pidfile);
        record.write(Pid::from_raw(child.id() as i32)).unwrap();

        ensure_single_instance(&cfg, &record).unwrap();
        assert!(!record.path().exists());
    }

    #[test]
    fn busy_port_without_force_fails_once() {
        let dir = tempfile::tempdir().unwrap();
        let holder = TcpListener::bind("127.0.0.1:0").unwrap();
        let cfg = ServerConfig {
            bind: "127.0.0.1".parse().unwrap(),
            port: holder.local_addr().unwrap().port(),
            ..config(&dir, false)
        };
        match bind_with_retry(&cfg) {
            Err(ServerError::Bind { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("unexpected: {:?}", other.map(|l| l.local_addr())),
        }
    }

    #[test]
    fn busy_port_with_force_retries_then_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let holder = TcpListener::bind("127.0.0.1:0").unwrap();
        let cfg = ServerConfig {
            bind: "127.0.0.1".parse().unwrap(),
            port: holder.local_addr().unwrap().port(),
            bind_attempts: 3,
            bind_retry_delay: Duration::from_millis(10),
            ..config(&dir, true)
        };
        match bind_with_retry(&cfg) {
            Err(ServerError::Bind { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {:?}", other.map(|l| l.local_addr())),
        }
    }
}
