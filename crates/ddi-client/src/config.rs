//! Client tuning knobs.

use std::time::Duration;

/// Poll interval used when the server does not suggest a positive one.
pub const DEFAULT_SLEEP_SECS: u64 = 5 * 60;

/// Default timeout for a single HTTP request.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for a [`crate::DdiClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Sleep between polls when the server gives no usable interval.
    pub default_sleep: Duration,
    /// Bound on connecting and on receiving response headers. Buffered
    /// responses must also complete within it; streamed artifact transfers
    /// instead fail when a single chunk takes longer.
    pub request_timeout: Duration,
    /// Verify the server certificate when no client keypair is configured.
    pub verify_server_certificate: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_sleep: Duration::from_secs(DEFAULT_SLEEP_SECS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            verify_server_certificate: true,
        }
    }
}

impl ClientConfig {
    pub fn with_default_sleep(mut self, default_sleep: Duration) -> Self {
        self.default_sleep = default_sleep;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_server_certificate_verification(mut self, verify: bool) -> Self {
        self.verify_server_certificate = verify;
        self
    }
}
