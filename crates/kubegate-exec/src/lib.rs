//! Terminal and file transfer sessions for kubegate
//!
//! Both bridge an external connection to a command running inside a
//! container through the cluster's exec stream.

mod shell;
mod terminal;
mod transfer;

pub use shell::{ALLOWED_SHELLS, is_valid_shell};
pub use terminal::{CloseReason, TerminalBridge, TerminalConnection, TerminalState};
pub use transfer::FileTransfer;

// Re-export types used in our public API
pub use kubegate_k8s::{PodTarget, TerminalSize};
