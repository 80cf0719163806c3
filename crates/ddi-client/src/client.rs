//! DDI client: credential setters, request execution and the auth-recovery retry.
//!
//! Every request builds a fresh HTTP client from the current credentials, so a
//! credential change made by the auth-error handler applies to the retry.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use reqwest::{StatusCode, Url};

use crate::config::ClientConfig;
use crate::credentials::{build_http_client, AuthRestore, Credentials, SessionState};
use crate::error::{DdiError, Result};
use crate::handler::{AuthErrorHandler, EventHandler};
use crate::poll::{Sleeper, TokioSleeper};

const MAX_LOG_BODY_CHARS: usize = 512;

/// How a request's body is consumed, which decides how the timeout applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyRead {
    /// Read in one go; the timeout covers the whole exchange.
    Buffered,
    /// Streamed by the caller; the timeout covers connecting and the headers,
    /// and the caller bounds each chunk.
    Streamed,
}

pub(crate) struct ClientInner {
    pub(crate) session: SessionState,
    pub(crate) config: ClientConfig,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) auth_handler: Option<Arc<dyn AuthErrorHandler>>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
}

/// Device-side client for the hawkBit Direct Device Integration API.
///
/// Cloning is cheap and shares endpoint, credentials and handlers.
#[derive(Clone)]
pub struct DdiClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl fmt::Debug for DdiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DdiClient")
            .field("endpoint", &self.inner.session.endpoint())
            .field("credentials", &self.inner.session.credentials())
            .field("config", &self.inner.config)
            .field("has_auth_handler", &self.inner.auth_handler.is_some())
            .finish()
    }
}

impl AuthRestore for DdiClient {
    fn set_tls(&self, cert: &str, key: &str) {
        self.inner.session.set_tls(cert, key);
    }

    fn set_endpoint(&self, endpoint: &str) -> Result<()> {
        self.inner.session.set_endpoint(endpoint)
    }

    fn set_endpoint_parts(&self, server: &str, controller_id: &str, tenant: &str) -> Result<()> {
        self.inner
            .session
            .set_endpoint_parts(server, controller_id, tenant)
    }

    fn set_device_token(&self, token: &str) {
        self.inner.session.set_device_token(token);
    }

    fn set_gateway_token(&self, token: &str) {
        self.inner.session.set_gateway_token(token);
    }
}

/// Builder for [`DdiClient`].
pub struct DdiClientBuilder {
    config: ClientConfig,
    handler: Arc<dyn EventHandler>,
    auth_handler: Option<Arc<dyn AuthErrorHandler>>,
    sleeper: Arc<dyn Sleeper>,
}

impl DdiClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn auth_error_handler(mut self, handler: Arc<dyn AuthErrorHandler>) -> Self {
        self.auth_handler = Some(handler);
        self
    }

    /// Replace the sleeper used between polls (tests use a recording one).
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> DdiClient {
        DdiClient {
            inner: Arc::new(ClientInner {
                session: SessionState::new(),
                config: self.config,
                handler: self.handler,
                auth_handler: self.auth_handler,
                sleeper: self.sleeper,
            }),
        }
    }
}

impl DdiClient {
    pub fn builder(handler: Arc<dyn EventHandler>) -> DdiClientBuilder {
        DdiClientBuilder {
            config: ClientConfig::default(),
            handler,
            auth_handler: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Endpoint & Credentials
    // ─────────────────────────────────────────────────────────────────────────

    pub fn endpoint(&self) -> Option<Url> {
        self.inner.session.endpoint()
    }

    pub fn credentials(&self) -> Credentials {
        self.inner.session.credentials()
    }

    /// Set the absolute poll URI.
    pub fn set_endpoint(&self, endpoint: &str) -> Result<()> {
        self.inner.session.set_endpoint(endpoint)
    }

    /// Set the poll URI from server base, controller id and tenant.
    pub fn set_endpoint_parts(&self, server: &str, controller_id: &str, tenant: &str) -> Result<()> {
        self.inner
            .session
            .set_endpoint_parts(server, controller_id, tenant)
    }

    /// Authenticate with a target token; clears any TLS keypair.
    pub fn set_device_token(&self, token: &str) {
        self.inner.session.set_device_token(token);
    }

    /// Authenticate with a gateway token; clears any TLS keypair.
    pub fn set_gateway_token(&self, token: &str) {
        self.inner.session.set_gateway_token(token);
    }

    /// Authenticate with a PEM client certificate and key; removes the `Authorization` header.
    pub fn set_tls(&self, cert: &str, key: &str) {
        self.inner.session.set_tls(cert, key);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request Execution
    // ─────────────────────────────────────────────────────────────────────────

    fn log_response(status: StatusCode, body: &str) {
        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Ddi] API response error ({}): {}", status, preview);
    }

    /// Issue one request and classify the outcome.
    ///
    /// The body is left unread on success so callers can stream it.
    pub(crate) async fn execute<F>(
        &self,
        url: &Url,
        expected: StatusCode,
        body_read: BodyRead,
        request: &F,
    ) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Sync,
    {
        let timeout = self.inner.config.request_timeout;
        let http = build_http_client(&self.inner.session.credentials(), &self.inner.config)?;
        let mut builder = request(&http);
        if body_read == BodyRead::Buffered {
            builder = builder.timeout(timeout);
        }

        let response = match tokio::time::timeout(timeout, builder.send()).await {
            Ok(sent) => sent.map_err(|e| {
                debug!("[Ddi] Transport error for {}: {}", url, e);
                DdiError::Http(e)
            })?,
            Err(_) => {
                debug!("[Ddi] No response from {} within {:?}", url, timeout);
                return Err(DdiError::timed_out(format!(
                    "no response from {} within {:?}",
                    url, timeout
                )));
            }
        };

        let status = response.status();
        if status == expected {
            debug!("[Ddi] {} -> {}", url, status);
            return Ok(response);
        }

        let body = match tokio::time::timeout(timeout, response.text()).await {
            Ok(Ok(body)) => body,
            _ => String::new(),
        };
        Self::log_response(status, &body);
        if status == StatusCode::UNAUTHORIZED {
            return Err(DdiError::Unauthorized);
        }
        Err(DdiError::unexpected_status(status.as_u16(), expected.as_u16()))
    }

    /// Run the auth-error handler, if any, against this client's session.
    pub(crate) async fn restore_auth(&self) -> bool {
        match &self.inner.auth_handler {
            Some(handler) => {
                handler.on_auth_error(&self.inner.session).await;
                true
            }
            None => false,
        }
    }

    /// Execute with at most one credential refresh: a 401 invokes the
    /// auth-error handler and the request is retried exactly once.
    async fn retry_once<F>(
        &self,
        url: &Url,
        expected: StatusCode,
        body_read: BodyRead,
        request: F,
    ) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Sync,
    {
        match self.execute(url, expected, body_read, &request).await {
            Err(DdiError::Unauthorized) => {
                warn!("[Ddi] Unauthorized response from {}", url);
                if !self.restore_auth().await {
                    return Err(DdiError::Unauthorized);
                }
                debug!("[Ddi] Retrying {} after credential refresh", url);
                self.execute(url, expected, body_read, &request).await
            }
            other => other,
        }
    }

    /// [`Self::retry_once`] for requests whose body is read in one go.
    pub(crate) async fn retrying_execute<F>(
        &self,
        url: &Url,
        expected: StatusCode,
        request: F,
    ) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Sync,
    {
        self.retry_once(url, expected, BodyRead::Buffered, request)
            .await
    }

    /// GET `url` expecting `200 OK`, leaving the body to be streamed.
    pub(crate) async fn open_stream(&self, url: &Url) -> Result<reqwest::Response> {
        self.retry_once(url, StatusCode::OK, BodyRead::Streamed, |http| {
            http.get(url.clone())
        })
        .await
    }

    /// Execute expecting `200 OK` and return the body as text.
    pub(crate) async fn fetch_text<F>(&self, url: &Url, request: F) -> Result<String>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Sync,
    {
        let response = self.retrying_execute(url, StatusCode::OK, request).await?;
        Ok(response.text().await?)
    }
}
