//! Session and server control built-ins.

use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::config::ServerConfig;
use crate::instance::{self, InstanceRecord, InstanceStatus};
use crate::procs;
use crate::registry::{Context, Outcome, Registry};
use crate::server::{Launch, Supervisor};

const START_VERIFY: Duration = Duration::from_secs(1);
const START_POLL: Duration = Duration::from_millis(50);

/// `help` lists everything; `help <name>...` shows the given entries.
pub fn help(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let registry = &ctx.host.registry;
    if argv.len() > 1 {
        let mut status = Outcome::OK;
        for wanted in &argv[1..] {
            let wanted = wanted.as_str();
            if let Some((name, text)) = registry.commands().find(|(n, _)| *n == wanted) {
                let _ = writeln!(ctx.output, "{name:<10} - {text}");
            } else if let Some((name, expansion, _)) =
                registry.aliases().find(|(n, ..)| *n == wanted)
            {
                let _ = writeln!(ctx.output, "{name:<10} - alias for '{}'", expansion.join(" "));
            } else {
                let _ = writeln!(ctx.output, "no help for command: {wanted}");
                status = Outcome::Continue(2);
            }
        }
        return status;
    }
    for (name, text) in registry.commands() {
        let _ = writeln!(ctx.output, "{name:<10} - {text}");
    }
    for (name, expansion, _) in registry.aliases() {
        let _ = writeln!(ctx.output, "{name:<10} - alias for '{}'", expansion.join(" "));
    }
    Outcome::OK
}

pub fn exit(_ctx: &mut Context<'_>, _argv: &[String]) -> Outcome {
    Outcome::TerminateSession
}

pub fn ps(ctx: &mut Context<'_>, _argv: &[String]) -> Outcome {
    let _ = writeln!(ctx.output, "  PID  PPID S COMMAND");
    for p in procs::snapshot() {
        let cmd = procs::cmdline(&p);
        let _ = writeln!(ctx.output, "{:>5} {:>5} {} {cmd}", p.pid, p.ppid, p.state);
    }
    Outcome::OK
}

/// `kill <pid> [sig]`, where `sig` is a number, `TERM`, or `SIGTERM`.
pub fn kill(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let (pid, sig) = match argv {
        [_, pid] => (pid, None),
        [_, pid, sig] => (pid, Some(sig.as_str())),
        _ => return ctx.usage("kill <pid> [sig]"),
    };
    let Ok(pid) = pid.parse::<i32>().map(Pid::from_raw) else {
        return ctx.usage("kill <pid> [sig]");
    };
    let signal = match sig.map(parse_signal).unwrap_or(Ok(Some(Signal::SIGTERM))) {
        Ok(s) => s,
        Err(e) => return ctx.fail("kill", e),
    };
    match signal::kill(pid, signal) {
        Ok(()) => Outcome::OK,
        Err(e) => ctx.fail(format!("kill {pid}"), e),
    }
}

/// `None` is signal 0: existence check only.
fn parse_signal(text: &str) -> Result<Option<Signal>, Errno> {
    if let Ok(n) = text.parse::<i32>() {
        return if n == 0 { Ok(None) } else { Signal::try_from(n).map(Some) };
    }
    let upper = text.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") { upper } else { format!("SIG{upper}") };
    Signal::from_str(&name).map(Some)
}

pub fn serverctl(ctx: &mut Context<'_>, argv: &[String]) -> Outcome {
    let Some(sub) = argv.get(1) else {
        return ctx.usage(
            "serverctl <start|stop|restart|status> [options]\n \
             start   [-p port] [--force]\n \
             stop\n \
             restart [-p port] [--force]\n \
             status",
        );
    };
    let record = InstanceRecord::new(&ctx.host.config.pidfile);
    match sub.as_str() {
        "status" => status(ctx, &record),
        "stop" => stop(ctx, &record),
        "start" => start(ctx, &record, &argv[2..]),
        "restart" => {
            let _ = stop(ctx, &record);
            start(ctx, &record, &argv[2..])
        }
        other => {
            let _ = writeln!(ctx.output, "serverctl: unknown subcommand '{other}'");
            Outcome::Continue(2)
        }
    }
}

fn status(ctx: &mut Context<'_>, record: &InstanceRecord) -> Outcome {
    match record.status() {
        Ok(s) => {
            let _ = writeln!(ctx.output, "serverctl: {s}");
            Outcome::Continue(i32::from(s.exit_code()))
        }
        Err(e) => ctx.fail(record.path().display(), e),
    }
}

fn stop(ctx: &mut Context<'_>, record: &InstanceRecord) -> Outcome {
    let status = match record.status() {
        Ok(s) => s,
        Err(e) => return ctx.fail(record.path().display(), e),
    };
    let pid = match status {
        InstanceStatus::Absent => {
            let _ = writeln!(ctx.output, "serverctl: not running");
            return Outcome::FAILED;
        }
        InstanceStatus::Stale(pid) => {
            let _ = record.remove();
            let _ = writeln!(
                ctx.output,
                "serverctl: not running (removed stale pidfile, pid={pid})"
            );
            return Outcome::FAILED;
        }
        InstanceStatus::Running(pid) => pid,
    };
    match instance::terminate(pid, ctx.host.config.takeover_timeout) {
        Ok(true) => {
            let _ = record.remove_if_owned(pid);
            let _ = writeln!(ctx.output, "serverctl: stopped (pid={pid})");
            Outcome::OK
        }
        Ok(false) => {
            let _ = writeln!(ctx.output, "serverctl: timeout waiting for pid {pid}");
            Outcome::FAILED
        }
        Err(e) => ctx.fail(format!("kill {pid}"), e),
    }
}

fn start(ctx: &mut Context<'_>, record: &InstanceRecord, args: &[String]) -> Outcome {
    let mut config = ctx.host.config.clone();
    config.daemonize = true;
    config.force = false;
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--force" | "-F" => config.force = true,
            "-p" => match it.next().and_then(|p| p.parse().ok()) {
                Some(port) => config.port = port,
                None => return ctx.usage("serverctl start [-p port] [--force]"),
            },
            _ => return ctx.usage("serverctl start [-p port] [--force]"),
        }
    }

    if let Ok(InstanceStatus::Running(pid)) = record.status() {
        if !config.force {
            let _ = writeln!(
                ctx.output,
                "serverctl: already running (pid={pid}). Use restart or start --force."
            );
            return Outcome::FAILED;
        }
    }

    let _ = writeln!(ctx.output, "serverctl: launching (port={})", config.port);
    let _ = ctx.output.flush();
    let launcher = match unsafe { fork() } {
        Ok(ForkResult::Child) => std::process::exit(launch(config, ctx.host.registry.clone())),
        Ok(ForkResult::Parent { child }) => child,
        Err(e) => return ctx.fail("fork", e),
    };
    match wait_for(launcher) {
        Some(0) => {}
        _ => {
            let _ = writeln!(ctx.output, "serverctl: start failed");
            return Outcome::FAILED;
        }
    }

    let deadline = Instant::now() + START_VERIFY;
    loop {
        if let Ok(InstanceStatus::Running(pid)) = record.status() {
            let _ = writeln!(ctx.output, "serverctl: running (pid={pid})");
            return Outcome::OK;
        }
        if Instant::now() >= deadline {
            let _ = writeln!(ctx.output, "serverctl: start verification failed");
            return Outcome::FAILED;
        }
        thread::sleep(START_POLL);
    }
}

/// Body of the launcher child: returns its exit status.
fn launch(config: ServerConfig, registry: Registry) -> i32 {
    // stage children run with the default SIGPIPE; handlers need it ignored
    unsafe {
        let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigIgn);
    }
    match Supervisor::launch(config, registry) {
        Ok(Launch::Detached(pid)) => {
            tracing::info!(pid = pid.as_raw(), "daemon started");
            0
        }
        // only the daemon itself gets here
        Ok(Launch::Serving(supervisor)) => match supervisor.serve() {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "server stopped");
                1
            }
        },
        Err(e) => {
            println!("serverctl: {e}");
            1
        }
    }
}

fn wait_for(pid: Pid) -> Option<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Some(code),
            Ok(WaitStatus::Signaled(..)) => return None,
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(_) => return None,
        }
    }
}
