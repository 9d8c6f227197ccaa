//! Single-instance bookkeeping: the pid record, liveness probing, and
//! termination of competing processes.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::procs;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Kernel limit on `/proc/<pid>/comm`, excluding the NUL.
const COMM_LEN: usize = 15;

/// A file holding the decimal pid of the running listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    path: PathBuf,
}

impl InstanceRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        InstanceRecord { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded pid, or `None` if the file is missing or unusable.
    pub fn read(&self) -> io::Result<Option<Pid>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(text
            .lines()
            .next()
            .and_then(|l| l.trim().parse::<i32>().ok())
            .filter(|&pid| pid > 1)
            .map(Pid::from_raw))
    }

    /// Replace the record atomically with `pid`.
    pub fn write(&self, pid: Pid) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", Pid::this()));
        let tmp = PathBuf::from(tmp);
        let result = fs::File::create(&tmp)
            .and_then(|mut f| {
                writeln!(f, "{pid}")?;
                f.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &self.path));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Remove the record only while it still names `pid`.
    pub fn remove_if_owned(&self, pid: Pid) -> io::Result<bool> {
        if self.read()? == Some(pid) {
            self.remove()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Classify the record. One naming the calling process counts as stale.
    pub fn status(&self) -> io::Result<InstanceStatus> {
        Ok(match self.read()? {
            None => InstanceStatus::Absent,
            Some(pid) if pid != Pid::this() && is_alive(pid) => InstanceStatus::Running(pid),
            Some(pid) => InstanceStatus::Stale(pid),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Absent,
    Running(Pid),
    Stale(Pid),
}

impl InstanceStatus {
    /// 0 running, 1 not running, 2 stale record.
    pub fn exit_code(self) -> u8 {
        match self {
            InstanceStatus::Running(_) => 0,
            InstanceStatus::Absent => 1,
            InstanceStatus::Stale(_) => 2,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Absent => write!(f, "not running"),
            InstanceStatus::Running(pid) => write!(f, "running (pid={pid})"),
            InstanceStatus::Stale(pid) => write!(f, "stale pidfile (pid={pid})"),
        }
    }
}

/// `kill(pid, 0)` liveness probe. Zombies are dead; `EPERM` means alive.
pub fn is_alive(pid: Pid) -> bool {
    match kill(pid, None) {
        Ok(()) | Err(Errno::EPERM) => !procs::info(pid).is_some_and(|p| p.is_zombie()),
        Err(_) => false,
    }
}

/// SIGTERM `pid` and wait up to `timeout` for it to go away. Returns whether
/// it is gone.
pub fn terminate(pid: Pid, timeout: Duration) -> Result<bool, Errno> {
    match kill(pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(true),
        Err(e) => return Err(e),
    }
    let deadline = Instant::now() + timeout;
    while is_alive(pid) {
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(true)
}

/// SIGTERM every live process named `name`, except the caller, its
/// ancestors, and `spare`. Returns the pids that were signalled.
pub fn sweep(name: &str, spare: &[Pid]) -> Vec<Pid> {
    let lineage = lineage();
    let comm = comm_name(name);
    procs::snapshot()
        .into_iter()
        .filter(|p| p.comm == comm && !p.is_zombie())
        .filter(|p| !lineage.contains(&p.pid) && !spare.contains(&p.pid))
        .filter_map(|p| match kill(p.pid, Signal::SIGTERM) {
            Ok(()) => {
                tracing::info!(pid = p.pid.as_raw(), name, "terminated by name");
                Some(p.pid)
            }
            Err(e) => {
                tracing::warn!(pid = p.pid.as_raw(), error = %e, "cannot signal");
                None
            }
        })
        .collect()
}

/// The calling process and every ancestor up to (not including) init.
fn lineage() -> Vec<Pid> {
    let mut chain = vec![Pid::this(), Pid::parent()];
    let mut cur = Pid::parent();
    while let Some(p) = procs::info(cur) {
        if p.ppid.as_raw() <= 1 || chain.contains(&p.ppid) {
            break;
        }
        chain.push(p.ppid);
        cur = p.ppid;
    }
    chain
}

fn comm_name(name: &str) -> &str {
    match name.char_indices().nth(COMM_LEN) {
        Some((cut, _)) => &name[..cut],
        None => name,
    }
}
