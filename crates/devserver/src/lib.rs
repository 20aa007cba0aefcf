//! Dev-server supervision inside the sandbox: concurrent port discovery,
//! one background `dev` process per project, and log-derived diagnostics.

pub mod logs;
pub mod supervisor;

pub use logs::{classify_line, parse_local_url_port, LogLevel};
pub use supervisor::{DevServerStatus, DevServerSupervisor, StartOutcome};
