//! Reference device behaviour: report a few attributes, acknowledge cancels and
//! download every offered artifact into a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ddi_client::{
    AuthErrorHandler, AuthRestore, CancelAction, ConfigRequest, DeliveryListener, DeploymentBase,
    EventHandler, Feedback, HandlingType,
};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;

pub struct DeviceHandler {
    download_dir: PathBuf,
}

impl DeviceHandler {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
        }
    }

    async fn download_all(&self, deployment: &DeploymentBase) -> anyhow::Result<usize> {
        let dir = self.download_dir.join(deployment.id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let mut count = 0;
        for artifact in deployment.artifacts() {
            let path = dir.join(safe_file_name(&artifact.filename)?);
            info!(
                "Downloading {} ({} bytes) to {}",
                artifact.filename,
                artifact.size,
                path.display()
            );
            artifact.download_to(&path).await?;
            count += 1;
        }
        Ok(count)
    }
}

/// Strip any directory components a server-provided name might carry.
fn safe_file_name(name: &str) -> anyhow::Result<&Path> {
    Path::new(name)
        .file_name()
        .map(Path::new)
        .ok_or_else(|| anyhow::anyhow!("invalid artifact filename '{}'", name))
}

struct LoggingListener {
    action_id: i64,
}

impl DeliveryListener for LoggingListener {
    fn on_successful_delivery(&self) {
        debug!("Feedback for action {} delivered", self.action_id);
    }

    fn on_error(&self) {
        warn!("Server rejected feedback for action {}", self.action_id);
    }
}

#[async_trait]
impl EventHandler for DeviceHandler {
    async fn on_config_request(&self) -> ConfigRequest {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        ConfigRequest::empty()
            .with_entry("hostname", hostname)
            .with_entry("agent_version", env!("CARGO_PKG_VERSION"))
            .with_entry("os", std::env::consts::OS)
    }

    async fn on_cancel_action(&self, action: CancelAction) -> Feedback {
        info!("Cancelling action {}", action.stop_id);
        Feedback::success()
            .with_detail(format!("action {} cancelled", action.stop_id))
            .with_delivery_listener(std::sync::Arc::new(LoggingListener {
                action_id: action.id,
            }))
    }

    async fn on_deployment_action(&self, deployment: DeploymentBase) -> Feedback {
        let listener = std::sync::Arc::new(LoggingListener {
            action_id: deployment.id,
        });

        if deployment.download == HandlingType::Skip {
            info!("Deployment {} asks to skip download", deployment.id);
            return Feedback::success()
                .with_detail("download skipped")
                .with_delivery_listener(listener);
        }

        match self.download_all(&deployment).await {
            Ok(count) => {
                info!("Deployment {}: {} artifact(s) downloaded", deployment.id, count);
                Feedback::success()
                    .with_detail(format!("downloaded {} artifact(s)", count))
                    .with_delivery_listener(listener)
            }
            Err(e) => {
                error!("Deployment {} failed: {:#}", deployment.id, e);
                Feedback::failure()
                    .with_detail(format!("{:#}", e))
                    .with_delivery_listener(listener)
            }
        }
    }

    async fn on_no_actions(&self) {
        debug!("No pending actions");
    }
}

/// Re-reads the environment and re-applies endpoint and credentials.
pub struct EnvAuthRestorer;

#[async_trait]
impl AuthErrorHandler for EnvAuthRestorer {
    async fn on_auth_error(&self, restore: &dyn AuthRestore) {
        warn!("Authorization failed, reloading credentials");
        let result = AgentConfig::from_env().and_then(|config| config.apply(restore));
        if let Err(e) = result {
            error!("Failed to reload credentials: {:#}", e);
        }
    }
}
