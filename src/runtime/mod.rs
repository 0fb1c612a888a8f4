// Local runtime: which alias runs where, and the processes behind them

pub mod aliases;
pub mod descriptor;
pub mod health;
pub mod logs;
pub mod process;
pub mod registry;
pub mod state;
pub mod supervisor;

pub use aliases::{AliasEntry, AliasStore};
pub use descriptor::{RunnerDescriptor, TransportKind, RUNNER_FILE};
pub use health::{HealthChecker, HealthStatus};
pub use logs::LogSink;
pub use registry::{validate_alias, AliasRecord, Liveness, LockHandle, Registry, RuntimeKind};
pub use state::{FsStateStore, MemoryStateStore, StateStore};
pub use supervisor::{ReadinessPolicy, StopOutcome, Supervisor};
