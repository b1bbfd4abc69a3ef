//! `show stat` CSV decoding

use std::collections::HashMap;
use std::mem;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-frontend aggregate row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendStats {
    pub name: String,
    pub status: String,
    pub sessions_current: u64,
    pub sessions_total: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub requests_total: u64,
    pub rate: u64,
}

/// Per-backend aggregate row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    pub name: String,
    pub status: String,
    pub sessions_current: u64,
    pub sessions_total: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub queue_current: u64,
    pub active_servers: u64,
    pub backup_servers: u64,
}

/// One server under a backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub backend: String,
    pub name: String,
    pub status: String,
    pub weight: u64,
    pub sessions_current: u64,
    pub sessions_total: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub check_status: String,
    /// Seconds since the last UP/DOWN transition
    pub last_status_change: u64,
    /// Total downtime in seconds
    pub downtime: u64,
}

/// Totals over server rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_sessions: u64,
    pub current_sessions: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Decoded `show stat` output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frontends: Vec<FrontendStats>,
    pub backends: Vec<BackendStats>,
    pub servers: Vec<ServerStats>,
    pub summary: StatsSummary,
}

impl StatsSnapshot {
    /// Servers belonging to `backend`
    pub fn servers_of<'a>(&'a self, backend: &'a str) -> impl Iterator<Item = &'a ServerStats> + 'a {
        self.servers.iter().filter(move |s| s.backend == backend)
    }
}

/// One CSV row keyed by header name
struct Row<'a> {
    fields: HashMap<&'a str, String>,
}

impl Row<'_> {
    fn text(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or("")
    }

    fn status(&self) -> String {
        match self.text("status") {
            "" => "UNKNOWN".to_string(),
            s => s.to_string(),
        }
    }

    /// Absent or non-numeric values count as 0
    fn num(&self, key: &str) -> u64 {
        self.text(key).trim().parse().unwrap_or(0)
    }
}

/// Split one CSV line. Fields may be wrapped in double quotes, inside
/// which commas are literal and `""` is an escaped quote.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Decode a `show stat` response.
///
/// The first line must be the `#`-prefixed column header; anything else
/// (e.g. `Unknown command.`) is a protocol error. Rows are classified by
/// `svname`: `FRONTEND`, `BACKEND`, or a server of backend `pxname`.
pub fn parse_stats(text: &str) -> Result<StatsSnapshot> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = match lines.next() {
        Some(line) if line.starts_with('#') => line,
        Some(line) => {
            return Err(Error::Protocol(format!(
                "unexpected reply to show stat: {}",
                line.trim()
            )))
        }
        None => return Err(Error::Protocol("empty reply to show stat".to_string())),
    };
    let columns: Vec<&str> = header.trim_start_matches('#').split(',').map(str::trim).collect();

    let mut snapshot = StatsSnapshot::default();

    for line in lines {
        let row = Row {
            fields: columns.iter().copied().zip(split_fields(line)).collect(),
        };
        let pxname = row.text("pxname");
        let svname = row.text("svname");
        if pxname.is_empty() || svname.is_empty() {
            continue;
        }

        match svname {
            "FRONTEND" => snapshot.frontends.push(FrontendStats {
                name: pxname.to_string(),
                status: row.status(),
                sessions_current: row.num("scur"),
                sessions_total: row.num("stot"),
                bytes_in: row.num("bin"),
                bytes_out: row.num("bout"),
                requests_total: row.num("req_tot"),
                rate: row.num("rate"),
            }),
            "BACKEND" => snapshot.backends.push(BackendStats {
                name: pxname.to_string(),
                status: row.status(),
                sessions_current: row.num("scur"),
                sessions_total: row.num("stot"),
                bytes_in: row.num("bin"),
                bytes_out: row.num("bout"),
                queue_current: row.num("qcur"),
                active_servers: row.num("act"),
                backup_servers: row.num("bck"),
            }),
            _ => {
                let server = ServerStats {
                    backend: pxname.to_string(),
                    name: svname.to_string(),
                    status: row.status(),
                    weight: row.num("weight"),
                    sessions_current: row.num("scur"),
                    sessions_total: row.num("stot"),
                    bytes_in: row.num("bin"),
                    bytes_out: row.num("bout"),
                    check_status: row.text("check_status").to_string(),
                    last_status_change: row.num("lastchg"),
                    downtime: row.num("downtime"),
                };

                let summary = &mut snapshot.summary;
                summary.total_sessions = summary.total_sessions.saturating_add(server.sessions_total);
                summary.current_sessions =
                    summary.current_sessions.saturating_add(server.sessions_current);
                summary.bytes_in = summary.bytes_in.saturating_add(server.bytes_in);
                summary.bytes_out = summary.bytes_out.saturating_add(server.bytes_out);
                snapshot.servers.push(server);
            }
        }
    }

    Ok(snapshot)
}
