// src/manager.rs

use crate::config::{ConfigError, ServerAddress};
use crate::downloader::{DownloadError, Downloader};
use crate::integrity::IntegrityError;
use crate::manifest::{parse_manifest, HashLedger};
use crate::models::{
    ByteProgress, PatchEvent, SessionPhase, SessionReport, SessionStatus, TransferOutcome, VerifiedState,
};
use crate::planner::{plan, Plan};
use crate::state_manager::StateManager;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MANIFEST_FILE: &str = "Manifest";
const LEDGER_FILE: &str = "Hashes";

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("no install directory selected")]
    MissingInstallRoot,
    #[error("a patch session is already running")]
    AlreadyRunning,
    #[error("patch server unavailable: {0}")]
    Resolve(#[from] ConfigError),
    #[error("cannot create install directory {}: {source}", path.display())]
    InstallRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch {what}: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: DownloadError,
    },
    #[error("reconciliation failed: {0}")]
    Plan(#[from] IntegrityError),
    #[error("patch worker stopped unexpectedly: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// What a single session needs from the caller.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub install_root: Option<PathBuf>,
    pub server: ServerAddress,
    /// Sum the declared sizes of all pending files before transferring.
    pub estimate_size: bool,
}

/// Starts patch sessions, at most one at a time.
#[derive(Debug, Clone)]
pub struct Patcher {
    downloader: Downloader,
    state_manager: StateManager,
    in_progress: Arc<AtomicBool>,
}

impl Patcher {
    pub fn new(downloader: Downloader, state_manager: StateManager) -> Self {
        Self {
            downloader,
            state_manager,
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Spawns the session worker on the current tokio runtime.
    pub fn start(&self, config: SessionConfig) -> Result<SessionHandle, PatchError> {
        let (running, install_root) = self.claim(&config)?;
        let (sender, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let session = self.session(install_root, &config, sender, cancel.clone());

        let join = tokio::spawn(async move {
            let _running = running;
            session.run().await
        });

        Ok(SessionHandle { events, cancel, join })
    }

    /// Fetches the manifest and ledger and reconciles them against the
    /// install root without transferring anything.
    pub async fn preview(&self, config: SessionConfig) -> Result<Plan, PatchError> {
        let (_running, install_root) = self.claim(&config)?;
        let (sender, _) = mpsc::unbounded_channel();
        let session = self.session(install_root, &config, sender, CancellationToken::new());
        Ok(session.prepare().await?.map(|prepared| prepared.plan).unwrap_or_default())
    }

    fn claim(&self, config: &SessionConfig) -> Result<(RunningGuard, PathBuf), PatchError> {
        let install_root = config.install_root.clone().ok_or(PatchError::MissingInstallRoot)?;
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PatchError::AlreadyRunning);
        }
        Ok((RunningGuard(self.in_progress.clone()), install_root))
    }

    fn session(
        &self,
        install_root: PathBuf,
        config: &SessionConfig,
        events: UnboundedSender<PatchEvent>,
        cancel: CancellationToken,
    ) -> Session {
        Session {
            downloader: self.downloader.clone(),
            state_manager: self.state_manager.clone(),
            install_root,
            server: config.server.clone(),
            estimate_size: config.estimate_size,
            events,
            cancel,
        }
    }
}

/// Clears the single-flight flag however the worker ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The caller's side of a running session.
pub struct SessionHandle {
    events: UnboundedReceiver<PatchEvent>,
    cancel: CancellationToken,
    join: JoinHandle<Result<SessionReport, PatchError>>,
}

impl SessionHandle {
    /// Asks the worker to stop after the current chunk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next progress event; `None` once the worker has finished and the
    /// queue is drained.
    pub async fn next_event(&mut self) -> Option<PatchEvent> {
        self.events.recv().await
    }

    pub async fn wait(self) -> Result<SessionReport, PatchError> {
        self.join.await?
    }
}

struct Session {
    downloader: Downloader,
    state_manager: StateManager,
    install_root: PathBuf,
    server: ServerAddress,
    estimate_size: bool,
    events: UnboundedSender<PatchEvent>,
    cancel: CancellationToken,
}

/// Everything the transfer loop needs, produced by the planning phase.
struct Prepared {
    base_url: String,
    ledger: HashLedger,
    state: VerifiedState,
    plan: Plan,
}

impl Session {
    async fn run(self) -> Result<SessionReport, PatchError> {
        self.emit(PatchEvent::Phase(SessionPhase::Planning));
        let result = match self.prepare().await {
            Ok(Some(prepared)) => Ok(self.transfer(prepared).await),
            Ok(None) => Ok(SessionReport {
                status: SessionStatus::Cancelled,
                pending: 0,
                verified: 0,
                failed: Vec::new(),
            }),
            Err(e) => Err(e),
        };

        let phase = match &result {
            Ok(report) if report.status == SessionStatus::Completed => SessionPhase::Completed,
            Ok(_) => SessionPhase::Cancelled,
            Err(e) => {
                error!(error = %e, "patch session failed");
                SessionPhase::Failed
            }
        };
        self.emit(PatchEvent::Phase(phase));
        result
    }

    /// Fetches the manifest and ledger and computes the pending set.
    /// `Ok(None)` means the user cancelled before planning finished.
    async fn prepare(&self) -> Result<Option<Prepared>, PatchError> {
        let addr = self.server.resolve().await?;
        let base_url = format!("http://{}", addr);
        info!(server = %self.server, %addr, "starting patch session");

        tokio::fs::create_dir_all(&self.install_root)
            .await
            .map_err(|source| PatchError::InstallRoot { path: self.install_root.clone(), source })?;

        let Some(manifest_text) = self.fetch_text(&base_url, MANIFEST_FILE).await? else {
            return Ok(None);
        };
        let Some(ledger_text) = self.fetch_text(&base_url, LEDGER_FILE).await? else {
            return Ok(None);
        };

        let entries = parse_manifest(&manifest_text);
        let ledger = HashLedger::parse(&ledger_text);
        info!(entries = entries.len(), hashes = ledger.len(), "manifest loaded");

        let state = self.state_manager.load().await;
        let plan = plan(&entries, &self.install_root, &state).await?;

        for (entry, reason) in &plan.skipped {
            self.emit(PatchEvent::Skipped { path: entry.path().to_string(), reason: *reason });
        }
        self.emit(PatchEvent::Planned { pending: plan.pending.len(), skipped: plan.skipped.len() });

        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(Prepared { base_url, ledger, state, plan }))
    }

    /// Downloads one of the server's index files into the install root and
    /// reads it back.
    async fn fetch_text(&self, base_url: &str, name: &'static str) -> Result<Option<String>, PatchError> {
        let url = format!("{}/{}", base_url, name);
        let destination = self.install_root.join(name);
        match self.downloader.download_to(&url, &destination, &self.cancel, |_| {}).await {
            Ok(_) => {}
            Err(DownloadError::Interrupted) => return Ok(None),
            Err(source) => return Err(PatchError::Fetch { what: name, source }),
        }
        let data = tokio::fs::read(&destination)
            .await
            .map_err(|e| PatchError::Fetch { what: name, source: e.into() })?;
        Ok(Some(String::from_utf8_lossy(&data).into_owned()))
    }

    async fn transfer(&self, prepared: Prepared) -> SessionReport {
        let Prepared { base_url, ledger, mut state, plan } = prepared;
        self.emit(PatchEvent::Phase(SessionPhase::Transferring));

        let session_total = if self.estimate_size {
            let bytes = self.estimate_download_size(&base_url, &plan).await;
            self.emit(PatchEvent::DownloadSizeEstimated(bytes));
            bytes
        } else {
            0
        };
        let started = Instant::now();
        let mut transferred = 0u64;

        let total = plan.pending.len();
        let mut verified = 0;
        let mut failed = Vec::new();
        let mut status = SessionStatus::Completed;

        for (index, entry) in plan.pending.iter().enumerate() {
            if self.cancel.is_cancelled() {
                status = SessionStatus::Cancelled;
                break;
            }

            let path = entry.path().to_string();
            self.emit(PatchEvent::FileStarted { index, total, path: path.clone() });

            let download_path = entry.download_path();
            let url = format!("{}/{}", base_url, download_path.trim_start_matches('/'));
            let destination = entry.local_path(&self.install_root);
            let expected = ledger.expected_hash(entry.path());

            let events = self.events.clone();
            let progress_path = path.clone();
            let mut file_bytes = 0;
            let result = self
                .downloader
                .fetch(&url, &destination, expected, &self.cancel, |progress| {
                    file_bytes = progress.downloaded;
                    let session = ByteProgress {
                        downloaded: transferred + progress.downloaded,
                        total: session_total,
                        elapsed: started.elapsed(),
                    };
                    let _ = events.send(PatchEvent::Bytes { path: progress_path.clone(), progress, session });
                })
                .await;
            transferred += file_bytes;

            let outcome = match result {
                Ok(done) => {
                    state.record(download_path, done.hash.clone());
                    verified += 1;
                    TransferOutcome::Verified(done)
                }
                Err(DownloadError::Interrupted) => {
                    info!(path = %path, "transfer interrupted by the user");
                    status = SessionStatus::Cancelled;
                    break;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "file failed");
                    failed.push(path.clone());
                    TransferOutcome::Failed(e.to_string())
                }
            };

            self.persist(&state).await;
            self.emit(PatchEvent::FileFinished { completed: index + 1, total, path, outcome });
        }

        self.persist(&state).await;
        info!(?status, verified, failed = failed.len(), "patch session finished");
        SessionReport { status, pending: total, verified, failed }
    }

    /// Best effort: files whose size cannot be determined count as zero.
    async fn estimate_download_size(&self, base_url: &str, plan: &Plan) -> u64 {
        let mut total = 0;
        for entry in &plan.pending {
            let url = format!("{}/{}", base_url, entry.download_path().trim_start_matches('/'));
            match self.downloader.remote_size(&url).await {
                Ok(size) => total += size,
                Err(e) => warn!(url, error = %e, "could not determine download size"),
            }
        }
        total
    }

    async fn persist(&self, state: &VerifiedState) {
        if let Err(e) = self.state_manager.persist(state).await {
            warn!(path = %self.state_manager.path().display(), error = %e, "failed to save verified state");
            self.emit(PatchEvent::StateNotPersisted(e.to_string()));
        }
    }

    fn emit(&self, event: PatchEvent) {
        // Nobody listening is fine; the report is still returned by `wait`.
        let _ = self.events.send(event);
    }
}
