//! Process table access through `/proc`.

use std::fs;
use std::path::Path;

use nix::unistd::Pid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub ppid: Pid,
    /// Scheduler state letter (`R`, `S`, `Z`, ...).
    pub state: char,
    pub comm: String,
}

impl ProcessInfo {
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }
}

/// Parse one `/proc/<pid>/stat` line.
///
/// `comm` is wrapped in parentheses and may itself contain spaces or `)`, so
/// the fields after it are found from the last `)`.
pub fn parse_stat(line: &str) -> Option<ProcessInfo> {
    let (head, rest) = line.rsplit_once(')')?;
    let (pid, comm) = head.split_once(" (")?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse::<i32>().ok()?;
    Some(ProcessInfo {
        pid: Pid::from_raw(pid.trim().parse().ok()?),
        ppid: Pid::from_raw(ppid),
        state,
        comm: comm.to_string(),
    })
}

pub fn info(pid: Pid) -> Option<ProcessInfo> {
    let line = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat(&line)
}

/// Every process currently listed under `/proc`, ordered by pid. Entries
/// that vanish while scanning are skipped.
pub fn snapshot() -> Vec<ProcessInfo> {
    snapshot_in(Path::new("/proc"))
}

fn snapshot_in(root: &Path) -> Vec<ProcessInfo> {
    let Ok(dir) = fs::read_dir(root) else { return Vec::new() };
    let mut procs: Vec<ProcessInfo> = dir
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|e| fs::read_to_string(e.path().join("stat")).ok())
        .filter_map(|line| parse_stat(&line))
        .collect();
    procs.sort_by_key(|p| p.pid.as_raw());
    procs
}

/// Command line with NULs turned into spaces; falls back to `[comm]` for
/// kernel threads and zombies.
pub fn cmdline(p: &ProcessInfo) -> String {
    match fs::read(format!("/proc/{}/cmdline", p.pid)) {
        Ok(raw) if !raw.is_empty() => raw
            .split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(" "),
        _ => format!("[{}]", p.comm),
    }
}
