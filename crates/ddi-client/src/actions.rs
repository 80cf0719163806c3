//! Action sub-protocols: config data upload, cancel and deployment feedback.
//!
//! Each returns whether the loop should skip its next sleep.

use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};

use crate::client::DdiClient;
use crate::error::{DdiError, Result};
use crate::feedback::{encode_config_data, encode_feedback, feedback_url, Feedback};
use crate::types::{ActionId, CancelAction, DeploymentBase};

const JSON_CONTENT_TYPE: &str = "application/json";

impl DdiClient {
    /// Ask the handler for configuration data and PUT it to `follow`.
    ///
    /// Nothing is sent when the handler returns no data.
    pub(crate) async fn follow_config_data(&self, follow: &Url) -> Result<bool> {
        let request = self.inner.handler.on_config_request().await;
        if request.data.is_empty() {
            debug!("[Ddi] No config data to report");
            return Ok(false);
        }

        let body = encode_config_data(&request.data, request.mode)?;
        info!(
            "[Ddi] Reporting {} config data entries to {}",
            request.data.len(),
            follow
        );
        self.retrying_execute(follow, StatusCode::OK, |http| {
            http.put(follow.clone())
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body(body.clone())
        })
        .await?;

        Ok(request.is_ignored_sleep())
    }

    /// Fetch the cancel request, let the handler decide, and post feedback.
    pub(crate) async fn follow_cancel_action(&self, follow: &Url) -> Result<bool> {
        let body = self
            .fetch_text(follow, |http| http.get(follow.clone()))
            .await?;
        let action = CancelAction::from_json(&body)?;
        let action_id = action.id;
        info!(
            "[Ddi] Cancel requested for action {} (stop id {})",
            action_id, action.stop_id
        );

        let feedback = self.inner.handler.on_cancel_action(action).await;
        self.deliver_feedback(follow, &feedback, action_id).await?;
        Ok(feedback.is_ignored_sleep())
    }

    /// Fetch the deployment, let the handler process it, and post feedback.
    pub(crate) async fn follow_deployment_base(&self, follow: &Url) -> Result<bool> {
        let body = self
            .fetch_text(follow, |http| http.get(follow.clone()))
            .await?;
        let deployment = DeploymentBase::from_json(&body, self)?;
        let action_id = deployment.id;
        info!(
            "[Ddi] Deployment {} offered with {} chunk(s)",
            action_id,
            deployment.chunks.len()
        );

        let feedback = self.inner.handler.on_deployment_action(deployment).await;
        self.deliver_feedback(follow, &feedback, action_id).await?;
        Ok(feedback.is_ignored_sleep())
    }

    /// POST feedback to `<follow>/feedback`.
    ///
    /// An unexpected status is handed to the delivery listener when one is
    /// attached; every other failure propagates.
    async fn deliver_feedback(
        &self,
        follow: &Url,
        feedback: &Feedback,
        action_id: ActionId,
    ) -> Result<()> {
        let target = feedback_url(follow);
        let body = encode_feedback(feedback, action_id)?;
        debug!("[Ddi] Posting feedback for action {} to {}", action_id, target);

        let result = self
            .retrying_execute(&target, StatusCode::OK, |http| {
                http.post(target.clone())
                    .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                    .body(body.clone())
            })
            .await;

        match result {
            Ok(_) => {
                if let Some(listener) = feedback.delivery_listener() {
                    listener.on_successful_delivery();
                }
                Ok(())
            }
            Err(err @ DdiError::UnexpectedStatus { .. }) => match feedback.delivery_listener() {
                Some(listener) => {
                    warn!(
                        "[Ddi] Feedback for action {} rejected: {}",
                        action_id, err
                    );
                    listener.on_error();
                    Ok(())
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}
