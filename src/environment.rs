//! Setup and teardown of the services a test run talks to.

use crate::config::{ConfigError, HarnessConfig, ServiceMode};
use anchorwatch_anchor::AnchorService;
use anchorwatch_core::{WaitError, WaitOutcome};
use anchorwatch_stream::{wait_for_anchor, StreamHandle, StreamNetwork};
use tracing_subscriber::EnvFilter;

const ANCHOR_SCHEDULE: u64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("anchor service mode '{0}' is not supported in-process")]
    UnsupportedMode(ServiceMode),

    #[error("cannot restart anchor service running in {0} mode")]
    NotRestartable(ServiceMode),
}

/// Services shared by every test in a run.
pub struct TestEnvironment {
    config: HarnessConfig,
    network: StreamNetwork,
    anchors: AnchorService,
}

impl TestEnvironment {
    /// Validate `config` and start the in-process services it asks for.
    /// Scheduled anchoring spawns a task, so this must run inside a tokio
    /// runtime when the anchor service is in node mode.
    ///
    /// # Errors
    /// `Config` for invalid configuration, `UnsupportedMode` for an anchor
    /// service in client mode.
    pub fn setup(config: HarnessConfig) -> Result<Self, EnvironmentError> {
        config.validate()?;
        tracing::info!(environment = %config.environment, "setting up test environment");
        if config.anchor.mode == ServiceMode::Client {
            return Err(EnvironmentError::UnsupportedMode(ServiceMode::Client));
        }

        let network = StreamNetwork::new();
        let anchors = AnchorService::new(network.clone(), config.anchor.chain_id.clone());
        let env = Self {
            config,
            network,
            anchors,
        };
        env.start_anchor_schedule();
        Ok(env)
    }

    fn start_anchor_schedule(&self) {
        if self.config.anchor.mode != ServiceMode::Node {
            return;
        }
        if let Some(every) = self.config.anchor_interval() {
            self.anchors.schedule(ANCHOR_SCHEDULE, every);
            tracing::info!(interval_secs = every.as_secs(), "anchor schedule started");
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn network(&self) -> &StreamNetwork {
        &self.network
    }

    pub fn anchors(&self) -> &AnchorService {
        &self.anchors
    }

    /// Wait for `stream` to be anchored within the configured timeout.
    ///
    /// # Errors
    /// See [`wait_for_anchor`].
    pub async fn wait_for_anchor(&self, stream: &StreamHandle) -> Result<WaitOutcome, WaitError> {
        wait_for_anchor(stream, self.config.anchor_timeout()).await
    }

    /// Stop and restart the in-process anchor schedule. Streams keep their state.
    ///
    /// # Errors
    /// `NotRestartable` unless the anchor service runs in node mode.
    pub fn restart_anchors(&self) -> Result<(), EnvironmentError> {
        if self.config.anchor.mode != ServiceMode::Node {
            return Err(EnvironmentError::NotRestartable(self.config.anchor.mode));
        }
        self.anchors.clear(ANCHOR_SCHEDULE);
        tracing::info!("restarting anchor service");
        self.start_anchor_schedule();
        Ok(())
    }

    /// Stop anchoring and close the network. Waits still outstanding fail
    /// with a subscription error instead of hanging.
    pub fn teardown(self) {
        tracing::info!(environment = %self.config.environment, "tearing down test environment");
        self.anchors.shutdown();
        self.network.close();
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Returns false if a global subscriber was already set.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
