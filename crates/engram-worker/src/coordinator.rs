use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKER_PORT: u16 = 9102;

const ABORT_TIMEOUT: Duration = Duration::from_secs(3);
const HEALTH_TIMEOUT: Duration = Duration::from_millis(500);
const SPAWN_POLL_ATTEMPTS: u32 = 10;
const SPAWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Whether the worker acknowledged a teardown request. The store commit is
/// authoritative either way; this only records whether the peer was told.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerSignal {
    NotAttempted,
    Notified,
    Unreachable,
}

/// Command used to launch the worker process when none is running.
#[derive(Clone, Debug)]
pub struct SpawnCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub port: u16,
    pub request_timeout: Duration,
    /// None disables spawning; `ensure_running` then only health-checks.
    pub spawn: Option<SpawnCommand>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_WORKER_PORT,
            request_timeout: ABORT_TIMEOUT,
            spawn: None,
        }
    }
}

/// Client side of the worker protocol: health checks, best-effort launch,
/// best-effort abort. Nothing here ever blocks session completion.
pub struct WorkerCoordinator {
    client: reqwest::Client,
    config: WorkerConfig,
}

impl WorkerCoordinator {
    pub fn new(config: WorkerConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(HEALTH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Confirm a worker is serving on the configured port, launching one if
    /// a spawn command is configured. Returns whether the worker is ready;
    /// callers treat `false` as "skip dependent step", never as fatal.
    pub async fn ensure_running(&self) -> bool {
        if self.health_check(self.config.port).await {
            return true;
        }

        let Some(spawn) = &self.config.spawn else {
            debug!(port = self.config.port, "no worker and no spawn command configured");
            return false;
        };

        let spawned = tokio::process::Command::new(&spawn.program)
            .args(&spawn.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();

        if let Err(e) = spawned {
            warn!(program = %spawn.program, error = %e, "failed to spawn worker");
            return false;
        }

        for _ in 0..SPAWN_POLL_ATTEMPTS {
            tokio::time::sleep(SPAWN_POLL_INTERVAL).await;
            if self.health_check(self.config.port).await {
                info!(port = self.config.port, "worker ready");
                return true;
            }
        }
        warn!(port = self.config.port, "worker did not become ready");
        false
    }

    /// Ask the worker to abort the job for a session. Bounded wait; any
    /// non-success response or network failure is a soft failure — logged
    /// and absorbed, never retried.
    pub async fn abort(&self, session_id: &str, port: u16) -> WorkerSignal {
        let url = format!("http://127.0.0.1:{port}/sessions/{session_id}");

        let result = self
            .client
            .delete(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(session_id, port, "worker acknowledged abort");
                WorkerSignal::Notified
            }
            Ok(resp) => {
                warn!(
                    session_id,
                    port,
                    status = resp.status().as_u16(),
                    "worker rejected abort, state already persisted"
                );
                WorkerSignal::Unreachable
            }
            Err(e) => {
                warn!(
                    session_id,
                    port,
                    error = %e,
                    "worker unreachable, state already persisted"
                );
                WorkerSignal::Unreachable
            }
        }
    }

    async fn health_check(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/health");
        match self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
