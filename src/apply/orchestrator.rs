//! Transactional apply/restore of the live HAProxy config

use std::future::Future;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{ApplyResult, ApplyState, CheckReport, ConfigValidator, ServiceController};
use crate::backup::{BackupMeta, BackupRegistry};
use crate::codec;
use crate::error::{Error, Result};
use crate::topology::Topology;

const RESTART_WARNING: &str =
    "The config file was restored, but the running HAProxy process was not reverted; check the service status";

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Live HAProxy config path
    pub config_path: PathBuf,
    /// Service restarted/reloaded after a successful write
    pub service_name: String,
    /// Upper bound for restart and reload
    pub restart_timeout: Duration,
    /// Upper bound for the validator
    pub validate_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            service_name: "haproxy".to_string(),
            restart_timeout: Duration::from_secs(10),
            validate_timeout: Duration::from_secs(30),
        }
    }
}

/// Serializes, validates and activates configs, rolling back on failure.
///
/// Each apply or restore runs on its own task. Dropping the future
/// returned by [`apply`](Self::apply) or
/// [`restore_backup`](Self::restore_backup) does not stop that task: it
/// still finishes (or rolls back) and only then releases the gate.
pub struct ApplyOrchestrator {
    inner: Arc<Transactor>,
    /// Held for the whole of an apply/restore/reload
    gate: Arc<Mutex<()>>,
}

/// Everything a transaction task needs
struct Transactor {
    config: OrchestratorConfig,
    registry: Arc<BackupRegistry>,
    validator: Arc<dyn ConfigValidator>,
    controller: Arc<dyn ServiceController>,
    state_tx: watch::Sender<ApplyState>,
}

impl ApplyOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<BackupRegistry>,
        validator: Arc<dyn ConfigValidator>,
        controller: Arc<dyn ServiceController>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ApplyState::Idle);
        Self {
            inner: Arc::new(Transactor {
                config,
                registry,
                validator,
                controller,
                state_tx,
            }),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Live config path
    pub fn config_path(&self) -> &Path {
        &self.inner.config.config_path
    }

    /// Current state
    pub fn state(&self) -> ApplyState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ApplyState> {
        self.inner.state_tx.subscribe()
    }

    /// Serialize `topology` and push it live
    pub async fn apply(&self, topology: &Topology, actor: &str) -> ApplyResult {
        let guard = match self.gate.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(actor, "Apply rejected, another operation is in progress");
                return ApplyResult::failure(self.state(), &Error::Busy, None);
            }
        };

        info!(
            actor,
            frontends = topology.frontends().len(),
            backends = topology.backends().len(),
            "Applying configuration"
        );
        for (frontend, backend) in topology.dangling_default_backends() {
            warn!(frontend, backend, "default_backend does not name a modeled backend");
        }

        let candidate = codec::serialize(topology).into_bytes();
        self.run(
            guard,
            candidate,
            actor,
            "auto-backup before apply".to_string(),
            "Configuration applied and HAProxy restarted successfully".to_string(),
        )
        .await
    }

    /// Put a stored backup back live, guarded the same way as an apply
    pub async fn restore_backup(&self, id: i64, actor: &str) -> ApplyResult {
        let guard = match self.gate.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(actor, id, "Restore rejected, another operation is in progress");
                return ApplyResult::failure(self.state(), &Error::Busy, None);
            }
        };

        info!(actor, id, "Restoring backup");

        let content = match self.inner.registry.read(id).await {
            Ok(content) => content,
            Err(e) => {
                warn!(id, error = %e, "Backup cannot be restored");
                return self.inner.finish(ApplyResult::failure(ApplyState::Idle, &e, None));
            }
        };

        self.run(
            guard,
            content,
            actor,
            format!("safety backup before restoring backup {}", id),
            format!("Backup {} restored and HAProxy restarted successfully", id),
        )
        .await
    }

    /// Gracefully reload the service without touching the file
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.gate.try_lock().map_err(|_| Error::Busy)?;

        let config = &self.inner.config;
        info!(service = %config.service_name, "Reloading service");

        check(
            "reload",
            config.restart_timeout,
            self.inner.controller.reload(&config.service_name),
        )
        .await
        .map(|_| ())
        .map_err(Error::ReloadFailed)
    }

    /// Parse the live config
    pub fn current_topology(&self) -> Result<Topology> {
        codec::parse_file(&self.inner.config.config_path)
    }

    /// All backups, most recent first
    pub async fn list_backups(&self) -> Result<Vec<BackupMeta>> {
        self.inner.registry.list().await
    }

    /// Check a backup's integrity
    pub async fn verify_backup(&self, id: i64) -> Result<bool> {
        self.inner.registry.verify(id).await
    }

    /// Spawn the transaction, handing it the gate guard, and wait for it.
    /// The final state is published after the gate is released.
    async fn run(
        &self,
        guard: OwnedMutexGuard<()>,
        candidate: Vec<u8>,
        actor: &str,
        description: String,
        success_message: String,
    ) -> ApplyResult {
        let inner = self.inner.clone();
        let actor = actor.to_string();
        let task = tokio::spawn(async move {
            let result = inner
                .transact(&candidate, &actor, &description, success_message)
                .await;
            drop(guard);
            inner.finish(result)
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                let err = Error::RollbackFailed(format!("apply task ended abnormally: {}", e));
                error!(error = %err, "Live config may be invalid");
                self.inner
                    .finish(ApplyResult::failure(ApplyState::RollbackFailed, &err, None))
            }
        }
    }
}

impl Transactor {
    /// Backup, write, validate and restart; any failure after the write
    /// puts the previous file back. The caller publishes the final state.
    async fn transact(
        &self,
        candidate: &[u8],
        actor: &str,
        description: &str,
        success_message: String,
    ) -> ApplyResult {
        let path = &self.config.config_path;

        // Backup
        self.set_state(ApplyState::BackingUp);
        let prior = match read_live(path).await {
            Ok(prior) => prior,
            Err(e) => {
                let err = Error::Backup(format!("cannot read live config {}: {}", path.display(), e));
                error!(error = %err, "Aborting before any change");
                return ApplyResult::failure(ApplyState::Idle, &err, None);
            }
        };

        let backup = match &prior {
            Some(bytes) => match self.registry.snapshot(bytes, actor, description).await {
                Ok(meta) => Some(meta),
                Err(e) => {
                    let err = Error::Backup(e.to_string());
                    error!(error = %err, "Aborting before any change");
                    return ApplyResult::failure(ApplyState::Idle, &err, None);
                }
            },
            None => {
                info!(path = %path.display(), "No live config yet, nothing to back up");
                None
            }
        };

        // Write
        self.set_state(ApplyState::Writing);
        if let Err(e) = write_atomic(path, candidate).await {
            let err = Error::Write(format!("{}: {}", path.display(), e));
            error!(error = %err, "Live config left unchanged");
            return ApplyResult::failure(ApplyState::Idle, &err, backup);
        }
        debug!(path = %path.display(), bytes = candidate.len(), "Candidate config written");

        // Validate
        self.set_state(ApplyState::Validating);
        let validated = check(
            "validation",
            self.config.validate_timeout,
            self.validator.validate(path),
        )
        .await;

        let validator_notes = match validated {
            Ok(notes) => notes,
            Err(diagnostic) => {
                warn!(diagnostic = %diagnostic, "Candidate config rejected, rolling back");
                let err = Error::ValidationFailed(diagnostic);
                return self
                    .roll_back(prior.as_deref(), err, ApplyState::RolledBack, backup)
                    .await;
            }
        };
        self.set_state(ApplyState::Committed);

        // Restart
        self.set_state(ApplyState::Restarting);
        let service = &self.config.service_name;
        if let Err(diagnostic) = check(
            "restart",
            self.config.restart_timeout,
            self.controller.restart(service),
        )
        .await
        {
            warn!(service = %service, diagnostic = %diagnostic, "Restart failed, rolling back");
            let err = Error::RestartFailed(diagnostic);
            return self
                .roll_back(prior.as_deref(), err, ApplyState::RestartFailedRolledBack, backup)
                .await
                .with_warning(RESTART_WARNING);
        }

        info!(actor, service = %service, "Configuration live");

        let mut result = ApplyResult::success(ApplyState::Done, backup, success_message);
        if !validator_notes.is_empty() {
            result = result.with_warning(validator_notes);
        }
        result
    }

    /// Put `prior` back on the live path (or remove the file if there was none)
    async fn roll_back(
        &self,
        prior: Option<&[u8]>,
        cause: Error,
        rolled_back: ApplyState,
        backup: Option<BackupMeta>,
    ) -> ApplyResult {
        let path = &self.config.config_path;
        let restored = match prior {
            Some(bytes) => write_atomic(path, bytes).await,
            None => match fs::remove_file(path).await {
                Err(e) if e.kind() != IoErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };

        match restored {
            Ok(()) => {
                info!(path = %path.display(), "Previous config restored");
                ApplyResult::failure(rolled_back, &cause, backup)
            }
            Err(e) => {
                let err = Error::RollbackFailed(format!("{}; restoring previous config failed: {}", cause, e));
                error!(path = %path.display(), error = %err, "Live config may be invalid");
                ApplyResult::failure(ApplyState::RollbackFailed, &err, backup)
            }
        }
    }

    fn set_state(&self, state: ApplyState) {
        debug!(state = %state, "Apply state");
        self.state_tx.send_replace(state);
    }

    fn finish(&self, result: ApplyResult) -> ApplyResult {
        self.set_state(result.state);
        result
    }
}

/// Run a bounded external step. `Ok` carries any diagnostic text of a
/// passing step, `Err` the reason it failed or timed out.
async fn check<F>(step: &str, limit: Duration, fut: F) -> std::result::Result<String, String>
where
    F: Future<Output = Result<CheckReport>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(report)) if report.success => Ok(report.diagnostic),
        Ok(Ok(report)) if report.diagnostic.is_empty() => Err(format!("{} failed", step)),
        Ok(Ok(report)) => Err(report.diagnostic),
        Ok(Err(e)) => Err(format!("{} could not run: {}", step, e)),
        Err(_) => Err(format!("{} timed out after {:?}", step, limit)),
    }
}

async fn read_live(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Replace `path` with `content` via a sibling temp file and rename
async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| std::io::Error::new(IoErrorKind::InvalidInput, "config path has no file name"))?;
    let tmp = path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));

    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);

        if let Ok(meta) = fs::metadata(path).await {
            fs::set_permissions(&tmp, meta.permissions()).await?;
        }
        fs::rename(&tmp, path).await
    }
    .await;

    if written.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    written
}
