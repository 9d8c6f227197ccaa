//! Minimal remote command server: a supervised TCP listener handing each
//! connection a line-oriented shell session.

pub mod builtins;
pub mod config;
pub mod error;
pub mod exec;
pub mod instance;
pub mod lineio;
pub mod logging;
pub mod pipeline;
pub mod procs;
pub mod registry;
pub mod server;
pub mod session;
pub mod token;

pub use config::ServerConfig;
pub use error::{ExecError, ParseError, ServerError};
pub use instance::{InstanceRecord, InstanceStatus};
pub use registry::{Command, Outcome, Registry};
pub use server::{Launch, Supervisor};
pub use session::{Host, Session, SessionEnd};
