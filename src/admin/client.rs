//! Admin socket client

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::stats::{parse_stats, StatsSnapshot};
use crate::error::{Error, Result};

/// Reply to an enable/disable command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToggleResult {
    /// Command sent, without the trailing newline
    pub command: String,
    /// HAProxy's reply, trimmed
    pub response: String,
    /// HAProxy answers successful state changes with an empty reply
    pub accepted: bool,
}

/// Client for HAProxy's stats/admin socket.
///
/// Every command uses its own connection: write one line, read until the
/// peer closes. Connect, write and read are each bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct AdminClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl AdminClient {
    /// Create a new admin client
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// Socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Fetch and decode `show stat`
    pub async fn fetch_stats(&self) -> Result<StatsSnapshot> {
        let response = self.send_command("show stat").await?;
        parse_stats(&response)
    }

    /// Enable or disable `backend/server` at runtime
    pub async fn toggle_server(
        &self,
        backend: &str,
        server: &str,
        enable: bool,
    ) -> Result<ToggleResult> {
        validate_name("backend", backend)?;
        validate_name("server", server)?;

        let verb = if enable { "enable" } else { "disable" };
        let command = format!("{} server {}/{}", verb, backend, server);
        let response = self.send_command(&command).await?.trim().to_string();
        let accepted = response.is_empty();

        info!(command = %command, accepted, response = %response, "Server state change sent");

        Ok(ToggleResult {
            command,
            response,
            accepted,
        })
    }

    /// Send one raw command and return the full reply
    pub async fn send_command(&self, command: &str) -> Result<String> {
        if command.chars().any(|c| c.is_control()) {
            return Err(Error::InvalidArgument(
                "admin command must be a single line".to_string(),
            ));
        }

        debug!(socket = %self.socket_path.display(), command, "Sending admin command");

        let mut stream = match timeout(self.timeout, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.connect_error(e)),
            Err(_) => return Err(Error::SocketTimeout(self.timeout)),
        };

        let request = format!("{}\n", command);
        match timeout(self.timeout, stream.write_all(request.as_bytes())).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::SocketTimeout(self.timeout)),
        }

        let mut response = Vec::new();
        match timeout(self.timeout, stream.read_to_end(&mut response)).await {
            Ok(result) => {
                result?;
            }
            Err(_) => return Err(Error::SocketTimeout(self.timeout)),
        }

        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    fn connect_error(&self, err: std::io::Error) -> Error {
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
                Error::SocketNotFound(self.socket_path.clone())
            }
            ErrorKind::PermissionDenied => Error::SocketPermissionDenied(self.socket_path.clone()),
            _ => Error::Io(err),
        }
    }
}

/// Reject names that could smuggle extra tokens or commands onto the socket
fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument(format!("{} name is empty", what)));
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '/' || c == ';')
    {
        return Err(Error::InvalidArgument(format!(
            "{} name '{}' contains forbidden characters",
            what,
            name.escape_debug()
        )));
    }
    Ok(())
}
