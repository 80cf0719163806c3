//! Endpoint and credential state, and the per-request transport provider.

use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Identity, Url};

use crate::config::ClientConfig;
use crate::error::{DdiError, Result};

const TARGET_TOKEN_SCHEME: &str = "TargetToken";
const GATEWAY_TOKEN_SCHEME: &str = "GatewayToken";

/// Tenant used when an endpoint is built from parts without one.
pub const DEFAULT_TENANT: &str = "default";

/// The single active authentication scheme.
///
/// Holding one value makes the schemes mutually exclusive: setting a token
/// drops any keypair and setting a keypair drops the `Authorization` header.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    DeviceToken(String),
    GatewayToken(String),
    Keypair { cert: String, key: String },
}

impl Credentials {
    /// Value of the `Authorization` header, if the active scheme uses one.
    pub fn authorization(&self) -> Option<String> {
        match self {
            Self::DeviceToken(token) => Some(format!("{} {}", TARGET_TOKEN_SCHEME, token)),
            Self::GatewayToken(token) => Some(format!("{} {}", GATEWAY_TOKEN_SCHEME, token)),
            Self::None | Self::Keypair { .. } => None,
        }
    }

    /// PEM certificate and key for channel-level client authentication.
    pub fn keypair(&self) -> Option<(&str, &str)> {
        match self {
            Self::Keypair { cert, key } => Some((cert, key)),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self {
            Self::None => "None",
            Self::DeviceToken(_) => "DeviceToken(..)",
            Self::GatewayToken(_) => "GatewayToken(..)",
            Self::Keypair { .. } => "Keypair(..)",
        };
        f.write_str(scheme)
    }
}

/// Build the poll URI `<server>/<tenant>/controller/v1/<controller_id>`.
pub fn endpoint_from_parts(server: &str, controller_id: &str, tenant: &str) -> String {
    let tenant = if tenant.trim().is_empty() {
        DEFAULT_TENANT
    } else {
        tenant.trim()
    };
    format!(
        "{}/{}/controller/v1/{}",
        server.trim().trim_end_matches('/'),
        tenant,
        controller_id.trim()
    )
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint.trim())
        .map_err(|e| DdiError::endpoint(format!("{}: {}", endpoint, e)))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(DdiError::endpoint(format!("{}: not an absolute URI", endpoint)));
    }
    Ok(url)
}

/// Capability handed to the auth-error handler so it can restore access.
///
/// Every operation has the same effect as the matching setter on
/// [`crate::DdiClient`].
pub trait AuthRestore: Send + Sync {
    fn set_tls(&self, cert: &str, key: &str);
    fn set_endpoint(&self, endpoint: &str) -> Result<()>;
    fn set_endpoint_parts(&self, server: &str, controller_id: &str, tenant: &str) -> Result<()>;
    fn set_device_token(&self, token: &str);
    fn set_gateway_token(&self, token: &str);
}

#[derive(Debug, Default)]
struct Session {
    endpoint: Option<Url>,
    credentials: Credentials,
}

/// Endpoint and credentials owned by one client instance.
///
/// Cloning shares the state; access is serialized so setters may be called
/// from other tasks while the poll loop runs.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<Session>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self) -> Option<Url> {
        self.inner.lock().endpoint.clone()
    }

    pub fn credentials(&self) -> Credentials {
        self.inner.lock().credentials.clone()
    }

    fn set_credentials(&self, credentials: Credentials) {
        debug!("[Ddi] Switching credentials to {:?}", credentials);
        self.inner.lock().credentials = credentials;
    }
}

impl AuthRestore for SessionState {
    fn set_tls(&self, cert: &str, key: &str) {
        self.set_credentials(Credentials::Keypair {
            cert: cert.to_string(),
            key: key.to_string(),
        });
    }

    fn set_endpoint(&self, endpoint: &str) -> Result<()> {
        let url = parse_endpoint(endpoint)?;
        debug!("[Ddi] Endpoint set to {}", url);
        self.inner.lock().endpoint = Some(url);
        Ok(())
    }

    fn set_endpoint_parts(&self, server: &str, controller_id: &str, tenant: &str) -> Result<()> {
        self.set_endpoint(&endpoint_from_parts(server, controller_id, tenant))
    }

    fn set_device_token(&self, token: &str) {
        self.set_credentials(Credentials::DeviceToken(token.to_string()));
    }

    fn set_gateway_token(&self, token: &str) {
        self.set_credentials(Credentials::GatewayToken(token.to_string()));
    }
}

/// Build a fresh HTTP client carrying the given credentials.
///
/// A keypair configures mutual TLS; otherwise the server certificate is
/// verified unless disabled in the config.
pub fn build_http_client(
    credentials: &Credentials,
    config: &ClientConfig,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(config.request_timeout);

    if let Some(value) = credentials.authorization() {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&value)
            .map_err(|_| DdiError::credentials("Invalid token format"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        builder = builder.default_headers(headers);
    }

    match credentials.keypair() {
        Some((cert, key)) => {
            let mut pem = cert.as_bytes().to_vec();
            if !pem.ends_with(b"\n") {
                pem.push(b'\n');
            }
            pem.extend_from_slice(key.as_bytes());
            let identity = Identity::from_pem(&pem)
                .map_err(|e| DdiError::credentials(format!("Failed to parse PEM keypair: {}", e)))?;
            builder = builder.identity(identity);
        }
        None => {
            builder = builder.danger_accept_invalid_certs(!config.verify_server_certificate);
        }
    }

    builder
        .build()
        .map_err(|e| DdiError::credentials(format!("Failed to build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_replaces_keypair_and_keypair_drops_header() {
        let state = SessionState::new();
        state.set_tls("CERT", "KEY");
        assert!(state.credentials().keypair().is_some());
        assert_eq!(state.credentials().authorization(), None);

        state.set_device_token("abc");
        assert_eq!(state.credentials().keypair(), None);
        assert_eq!(
            state.credentials().authorization().as_deref(),
            Some("TargetToken abc")
        );

        state.set_tls("CERT", "KEY");
        assert_eq!(state.credentials().authorization(), None);

        state.set_gateway_token("gw");
        assert_eq!(state.credentials().keypair(), None);
        assert_eq!(
            state.credentials().authorization().as_deref(),
            Some("GatewayToken gw")
        );
    }

    #[test]
    fn endpoint_parts_default_tenant_and_trailing_slash() {
        assert_eq!(
            endpoint_from_parts("https://hawkbit.example.com/", "dev-1", ""),
            "https://hawkbit.example.com/default/controller/v1/dev-1"
        );
        assert_eq!(
            endpoint_from_parts("https://hawkbit.example.com", "dev-1", "acme"),
            "https://hawkbit.example.com/acme/controller/v1/dev-1"
        );
    }

    #[test]
    fn relative_endpoint_is_rejected() {
        let state = SessionState::new();
        let err = state.set_endpoint("/controller/v1/dev").unwrap_err();
        assert!(matches!(err, DdiError::InvalidEndpoint(_)));
        assert!(state.endpoint().is_none());

        state
            .set_endpoint("https://hawkbit.example.com/default/controller/v1/dev")
            .unwrap();
        assert_eq!(
            state.endpoint().unwrap().path(),
            "/default/controller/v1/dev"
        );
    }

    #[test]
    fn malformed_keypair_fails_client_construction() {
        let credentials = Credentials::Keypair {
            cert: "not a certificate".to_string(),
            key: "not a key".to_string(),
        };
        let err = build_http_client(&credentials, &ClientConfig::default()).unwrap_err();
        assert!(matches!(err, DdiError::InvalidCredentials(_)));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", Credentials::DeviceToken("secret".to_string()));
        assert!(!rendered.contains("secret"));
    }
}
