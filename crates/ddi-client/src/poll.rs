//! Poll directive decoding and the long-running poll loop.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Url;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::client::DdiClient;
use crate::error::{DdiError, Result};
use crate::types::{parse_link, ActionKind, Link};

/// Suspends the poll loop between iterations.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// The action announced by a poll, with its follow-up URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    None,
    ConfigData(Url),
    CancelAction(Url),
    DeploymentBase(Url),
}

impl PendingAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::None => ActionKind::None,
            Self::ConfigData(_) => ActionKind::ConfigData,
            Self::CancelAction(_) => ActionKind::CancelAction,
            Self::DeploymentBase(_) => ActionKind::DeploymentBase,
        }
    }

    pub fn follow_url(&self) -> Option<&Url> {
        match self {
            Self::None => None,
            Self::ConfigData(url) | Self::CancelAction(url) | Self::DeploymentBase(url) => {
                Some(url)
            }
        }
    }
}

/// Decoded poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollDirective {
    pub action: PendingAction,
    /// Suggested sleep in milliseconds; zero or less means "use the default".
    pub sleep_ms: i64,
}

#[derive(Debug, Deserialize)]
struct RawPoll {
    #[serde(default)]
    config: Option<RawPollConfig>,
    #[serde(rename = "_links", default)]
    links: RawPollLinks,
}

#[derive(Debug, Deserialize)]
struct RawPollConfig {
    #[serde(default)]
    polling: Option<RawPolling>,
}

#[derive(Debug, Deserialize)]
struct RawPolling {
    #[serde(default)]
    sleep: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPollLinks {
    deployment_base: Option<Link>,
    config_data: Option<Link>,
    cancel_action: Option<Link>,
}

/// Parse an `HH:MM:SS` interval into milliseconds.
fn parse_sleep_ms(value: &str) -> Option<i64> {
    let mut fields = value.trim().split(':');
    let hours = fields.next()?.parse::<i64>().ok()?;
    let minutes = fields.next()?.parse::<i64>().ok()?;
    let seconds = fields.next()?.parse::<i64>().ok()?;
    if fields.next().is_some()
        || hours < 0
        || !(0..60).contains(&minutes)
        || !(0..60).contains(&seconds)
    {
        return None;
    }
    hours
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_mul(60)?
        .checked_add(seconds)?
        .checked_mul(1000)
}

impl PollDirective {
    /// Decode a poll body. At most one action is selected:
    /// cancel first, then deployment, then config data.
    pub fn from_json(body: &str) -> Result<Self> {
        let raw: RawPoll = serde_json::from_str(body)?;

        let sleep_ms = match raw
            .config
            .and_then(|config| config.polling)
            .and_then(|polling| polling.sleep)
        {
            Some(sleep) => parse_sleep_ms(&sleep).unwrap_or_else(|| {
                debug!("[Ddi] Ignoring unparsable polling sleep {:?}", sleep);
                0
            }),
            None => 0,
        };

        let links = raw.links;
        let action = if let Some(link) = &links.cancel_action {
            PendingAction::CancelAction(parse_link(link)?)
        } else if let Some(link) = &links.deployment_base {
            PendingAction::DeploymentBase(parse_link(link)?)
        } else if let Some(link) = &links.config_data {
            PendingAction::ConfigData(parse_link(link)?)
        } else {
            PendingAction::None
        };

        Ok(Self { action, sleep_ms })
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iteration {
    pub action: ActionKind,
    /// How long to wait before the next poll; `None` means poll again now.
    pub sleep: Option<Duration>,
}

impl DdiClient {
    fn require_endpoint(&self) -> Result<Url> {
        self.endpoint()
            .ok_or_else(|| DdiError::not_initialized("endpoint is not set"))
    }

    /// Perform a single poll and dispatch the announced action.
    pub async fn poll_once(&self) -> Result<Iteration> {
        let endpoint = self.require_endpoint()?;
        let body = self
            .fetch_text(&endpoint, |http| http.get(endpoint.clone()))
            .await?;
        let directive = PollDirective::from_json(&body)?;

        let sleep = if directive.sleep_ms > 0 {
            Duration::from_millis(directive.sleep_ms as u64)
        } else {
            self.config().default_sleep
        };

        let kind = directive.kind();
        debug!("[Ddi] Poll returned {:?}, next poll in {:?}", kind, sleep);
        let ignore_sleep = match directive.action {
            PendingAction::None => {
                self.inner.handler.on_no_actions().await;
                false
            }
            PendingAction::ConfigData(url) => self.follow_config_data(&url).await?,
            PendingAction::CancelAction(url) => self.follow_cancel_action(&url).await?,
            PendingAction::DeploymentBase(url) => self.follow_deployment_base(&url).await?,
        };

        Ok(Iteration {
            action: kind,
            sleep: (!ignore_sleep && !sleep.is_zero()).then_some(sleep),
        })
    }

    /// Poll until `cancel` fires or an error cannot be recovered.
    ///
    /// Without an endpoint the auth-error handler is asked once to provide one.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if self.endpoint().is_none() {
            if self.inner.auth_handler.is_none() {
                return Err(DdiError::not_initialized(
                    "endpoint or auth error handler is not set",
                ));
            }
            info!("[Ddi] No endpoint configured, asking auth error handler");
            self.restore_auth().await;
        }

        info!("[Ddi] Poll loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let iteration = self.poll_once().await?;
            let Some(sleep) = iteration.sleep else {
                debug!("[Ddi] Polling again immediately");
                continue;
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.inner.sleeper.sleep(sleep) => {}
            }
        }

        info!("[Ddi] Poll loop stopped");
        Ok(())
    }
}
