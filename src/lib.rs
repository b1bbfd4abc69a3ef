//! haproxy-keeper - HAProxy configuration translation and transactional apply
//!
//! Turns a structured description of a load-balancer topology (frontends,
//! backends, servers) into HAProxy's native configuration text, pushes it
//! live safely, and talks to HAProxy's admin socket for runtime control.
//!
//! # Architecture
//!
//! - [`topology`]: the in-memory model, validated at construction
//! - [`codec`]: model ⇄ configuration text, lossless for unmodeled directives
//! - [`backup`]: SHA-256 addressed snapshots indexed in SQLite
//! - [`apply`]: backup → write → validate → restart, with rollback on any
//!   failure so the live file is never left unvalidated
//! - [`admin`]: `show stat` and server enable/disable over the stats socket
//!
//! # Features
//!
//! - Deterministic, diff-stable output (sections and servers sorted by name)
//! - Operator-written directives carried through every round trip
//! - Pluggable validator and service controller for testing
//! - One apply/restore at a time; concurrent callers get `Busy`

pub mod admin;
pub mod apply;
pub mod backup;
pub mod codec;
pub mod config;
pub mod error;
pub mod topology;

pub use config::KeeperConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admin::{AdminClient, StatsSnapshot, ToggleResult};
    pub use crate::apply::{ApplyOrchestrator, ApplyResult, ApplyState};
    pub use crate::backup::{BackupMeta, BackupRegistry};
    pub use crate::config::KeeperConfig;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::topology::{Backend, Balance, Bind, Frontend, Mode, Server, Topology};
}
