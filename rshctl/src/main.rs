use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rshd::config::{DEFAULT_PIDFILE, PROCESS_NAME};
use rshd::instance::{self, InstanceRecord, InstanceStatus};

/// rshctl - inspect and stop an rshd instance
#[derive(Parser, Debug)]
#[command(name = "rshctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the instance record (pid file)
    #[arg(long, env = "RSHD_PIDFILE", default_value = DEFAULT_PIDFILE, global = true)]
    pidfile: PathBuf,

    /// Server process name, for `kill`
    #[arg(long, default_value = PROCESS_NAME, global = true)]
    name: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Report running (0), not running (1), or stale record (2)
    Status,
    /// SIGTERM the recorded instance and wait for it to exit
    Stop {
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
    /// SIGTERM every process with the server's name and drop the record
    Kill,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let record = InstanceRecord::new(&cli.pidfile);
    match &cli.command {
        Cmd::Status => {
            let status = record
                .status()
                .with_context(|| format!("read {}", cli.pidfile.display()))?;
            println!("rshctl: {status}");
            Ok(ExitCode::from(status.exit_code()))
        }
        Cmd::Stop { timeout_ms } => stop(&record, Duration::from_millis(*timeout_ms)),
        Cmd::Kill => {
            let killed = instance::sweep(&cli.name, &[]);
            for pid in &killed {
                println!("rshctl: terminated pid={pid}");
            }
            if killed.is_empty() {
                println!("rshctl: no '{}' processes", cli.name);
            }
            record.remove().with_context(|| format!("remove {}", cli.pidfile.display()))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn stop(record: &InstanceRecord, timeout: Duration) -> Result<ExitCode> {
    let pid = match record.status().context("read instance record")? {
        InstanceStatus::Absent => {
            println!("rshctl: not running");
            return Ok(ExitCode::from(1));
        }
        InstanceStatus::Stale(pid) => {
            record.remove().context("remove stale record")?;
            println!("rshctl: removed stale pidfile (pid={pid})");
            return Ok(ExitCode::from(1));
        }
        InstanceStatus::Running(pid) => pid,
    };
    let gone = instance::terminate(pid, timeout).with_context(|| format!("signal pid {pid}"))?;
    if !gone {
        println!("rshctl: pid {pid} still running after {}ms", timeout.as_millis());
        return Ok(ExitCode::FAILURE);
    }
    record.remove_if_owned(pid).context("remove instance record")?;
    println!("rshctl: stopped (pid={pid})");
    Ok(ExitCode::SUCCESS)
}
