use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use nix::unistd::Pid;

use rshd::config::{DEFAULT_PIDFILE, DEFAULT_PORT, PROCESS_NAME};
use rshd::lineio::FdReader;
use rshd::{builtins, logging, Host, Launch, ServerConfig, Session, Supervisor};

/// rshd - minimal remote command server (plain text, no authentication)
#[derive(Parser, Debug)]
#[command(name = "rshd")]
#[command(version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, env = "RSHD_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Detach into the background and write the instance record
    #[arg(short, long)]
    daemonize: bool,

    /// Replace a running instance instead of refusing to start
    #[arg(short = 'F', long)]
    force: bool,

    /// Path to the instance record (pid file)
    #[arg(long, env = "RSHD_PIDFILE", default_value = DEFAULT_PIDFILE)]
    pidfile: PathBuf,

    /// Process name terminated by a forced takeover
    #[arg(long, default_value = PROCESS_NAME)]
    name: String,

    /// Serve a single session on stdin/stdout instead of listening
    #[arg(long, conflicts_with_all = ["daemonize", "force"])]
    stdio: bool,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, env = "RSHD_LOG", default_value = "info")]
    log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            pidfile: self.pidfile.clone(),
            daemonize: self.daemonize,
            force: self.force,
            process_name: self.name.clone(),
            ..ServerConfig::default()
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    logging::init(&args.log_level, args.log_file.as_deref())?;
    let config = args.server_config();
    let registry = builtins::registry();

    if args.stdio {
        let host = Host::new(registry, config, Pid::this());
        let mut session = Session::new(&host, FdReader::stdin(), io::stdout());
        session.greet("stdio").context("write greeting")?;
        let end = session.run().context("session I/O")?;
        tracing::debug!(?end, "stdio session finished");
        return Ok(());
    }

    match Supervisor::launch(config, registry).context("startup failed")? {
        Launch::Detached(pid) => {
            println!("rshd: daemon started (pid={pid})");
            Ok(())
        }
        Launch::Serving(supervisor) => supervisor.serve().context("server failed"),
    }
}
