//! Application callbacks invoked by the poll loop.

use async_trait::async_trait;

use crate::credentials::AuthRestore;
use crate::feedback::Feedback;
use crate::types::{CancelAction, ConfigRequest, DeploymentBase};

/// Business logic deciding what the device reports for each action.
///
/// Handlers run on the polling task; a slow handler delays the next poll.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The server asked for configuration data. Returning empty data skips the upload.
    async fn on_config_request(&self) -> ConfigRequest;

    /// The server asked to cancel a running action.
    async fn on_cancel_action(&self, action: CancelAction) -> Feedback;

    /// The server offers a deployment. Artifacts can be fetched through the
    /// handles on [`DeploymentBase::chunks`].
    async fn on_deployment_action(&self, deployment: DeploymentBase) -> Feedback;

    /// The poll returned no pending action.
    async fn on_no_actions(&self);
}

/// Restores access when the endpoint is missing or a request comes back 401.
///
/// Invoked at most once per request; the request is retried once afterwards.
#[async_trait]
pub trait AuthErrorHandler: Send + Sync {
    async fn on_auth_error(&self, restore: &dyn AuthRestore);
}
