// Companion host: everything that runs on the host side of the control channel
// - Compatibility probe and launch preparation
// - Control channel client
// - Process supervisor and its watcher
// - Per-owner dispatch worker behind `CompanionHandle`

pub mod channel;
pub use channel::{ChannelError, CompanionChannel};

pub mod dispatch;
pub use dispatch::CompanionHandle;

pub mod error;
pub use error::LaunchError;

pub mod launch;
pub use launch::{companion_command, find_free_port};

pub mod notify;
pub use notify::{Notifier, TracingNotifier, Warning};

pub mod probe;
pub use probe::{probe, ProbeOutcome, UnreachableCause};

pub mod supervisor;
pub use supervisor::{LaunchAttemptRecord, Supervisor, SupervisorState};
