use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 2222;
pub const DEFAULT_PIDFILE: &str = "/tmp/rshd.pid";
/// Process name matched by the forced-takeover sweep.
pub const PROCESS_NAME: &str = "rshd";

/// Everything the supervisor and the control built-ins need to know about a
/// server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub pidfile: PathBuf,
    pub daemonize: bool,
    pub force: bool,
    pub process_name: String,
    pub bind_attempts: u32,
    pub bind_retry_delay: Duration,
    pub takeover_timeout: Duration,
    /// Pause after terminating a predecessor so the port is released.
    pub takeover_grace: Duration,
    /// Pause after a name sweep that signalled at least one process.
    pub sweep_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            pidfile: PathBuf::from(DEFAULT_PIDFILE),
            daemonize: false,
            force: false,
            process_name: PROCESS_NAME.to_string(),
            bind_attempts: 30,
            bind_retry_delay: Duration::from_millis(100),
            takeover_timeout: Duration::from_secs(2),
            takeover_grace: Duration::from_millis(150),
            sweep_grace: Duration::from_millis(200),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}
