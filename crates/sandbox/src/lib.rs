//! Sandbox lifecycle: the VM provider contract, the per-project state
//! machine, and the manager that creates, reconnects, restores, and
//! executes inside ephemeral VMs.

pub mod machine;
pub mod manager;
pub mod mock;
pub mod pkg;
pub mod provider;

pub use machine::{SandboxEvent, SandboxRecord, SandboxState};
pub use manager::SandboxManager;
pub use pkg::PackageManager;
pub use provider::{ExecOpts, ExecOutcome, VmHandle, VmProvider};
