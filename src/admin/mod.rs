//! Admin Protocol Client
//!
//! Runtime statistics and per-server enable/disable over HAProxy's local
//! stats socket. Independent of the apply path; never touches files.

mod client;
mod stats;

pub use client::{AdminClient, ToggleResult};
pub use stats::{parse_stats, BackendStats, FrontendStats, ServerStats, StatsSnapshot, StatsSummary};
