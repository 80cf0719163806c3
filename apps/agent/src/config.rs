//! Agent configuration read from `DDI_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use ddi_client::{AuthRestore, ClientConfig, DEFAULT_TENANT};

// ─────────────────────────────────────────────────────────────────────────────
// Variable Names
// ─────────────────────────────────────────────────────────────────────────────

pub const ENV_SERVER_URL: &str = "DDI_SERVER_URL";
pub const ENV_CONTROLLER_ID: &str = "DDI_CONTROLLER_ID";
pub const ENV_TENANT: &str = "DDI_TENANT";
pub const ENV_ENDPOINT: &str = "DDI_ENDPOINT";
pub const ENV_DEVICE_TOKEN: &str = "DDI_DEVICE_TOKEN";
pub const ENV_GATEWAY_TOKEN: &str = "DDI_GATEWAY_TOKEN";
pub const ENV_CLIENT_CERT: &str = "DDI_CLIENT_CERT";
pub const ENV_CLIENT_KEY: &str = "DDI_CLIENT_KEY";
pub const ENV_DEFAULT_SLEEP_SECS: &str = "DDI_DEFAULT_SLEEP_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "DDI_REQUEST_TIMEOUT_SECS";
pub const ENV_INSECURE_SKIP_VERIFY: &str = "DDI_INSECURE_SKIP_VERIFY";
pub const ENV_DOWNLOAD_DIR: &str = "DDI_DOWNLOAD_DIR";

const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";

/// Where the poll URI comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSource {
    Absolute(String),
    Parts {
        server: String,
        controller_id: String,
        tenant: String,
    },
}

/// Credential source. Keypair paths are read on every apply so rotated files are picked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSource {
    None,
    DeviceToken(String),
    GatewayToken(String),
    Keypair { cert: PathBuf, key: PathBuf },
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub endpoint: EndpointSource,
    pub auth: AuthSource,
    pub client: ClientConfig,
    pub download_dir: PathBuf,
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable lookup. Values are trimmed
    /// and empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let endpoint = match get(ENV_ENDPOINT) {
            Some(endpoint) => EndpointSource::Absolute(endpoint),
            None => {
                let server = get(ENV_SERVER_URL).with_context(|| {
                    format!("{} or {} must be set", ENV_ENDPOINT, ENV_SERVER_URL)
                })?;
                let controller_id = get(ENV_CONTROLLER_ID)
                    .with_context(|| format!("{} must be set", ENV_CONTROLLER_ID))?;
                EndpointSource::Parts {
                    server: server.trim_end_matches('/').to_string(),
                    controller_id,
                    tenant: get(ENV_TENANT).unwrap_or_else(|| DEFAULT_TENANT.to_string()),
                }
            }
        };

        let auth = match (
            get(ENV_DEVICE_TOKEN),
            get(ENV_GATEWAY_TOKEN),
            get(ENV_CLIENT_CERT),
            get(ENV_CLIENT_KEY),
        ) {
            (Some(token), None, None, None) => AuthSource::DeviceToken(token),
            (None, Some(token), None, None) => AuthSource::GatewayToken(token),
            (None, None, Some(cert), Some(key)) => AuthSource::Keypair {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            },
            (None, None, None, None) => AuthSource::None,
            (None, None, Some(_), None) | (None, None, None, Some(_)) => bail!(
                "{} and {} must be set together",
                ENV_CLIENT_CERT,
                ENV_CLIENT_KEY
            ),
            _ => bail!(
                "only one of {}, {} or a client keypair may be configured",
                ENV_DEVICE_TOKEN,
                ENV_GATEWAY_TOKEN
            ),
        };

        let mut client = ClientConfig::default();
        if let Some(secs) = get(ENV_DEFAULT_SLEEP_SECS) {
            client = client.with_default_sleep(Duration::from_secs(parse_secs(
                ENV_DEFAULT_SLEEP_SECS,
                &secs,
            )?));
        }
        if let Some(secs) = get(ENV_REQUEST_TIMEOUT_SECS) {
            client = client.with_request_timeout(Duration::from_secs(parse_secs(
                ENV_REQUEST_TIMEOUT_SECS,
                &secs,
            )?));
        }
        if let Some(flag) = get(ENV_INSECURE_SKIP_VERIFY) {
            client = client.with_server_certificate_verification(!parse_flag(&flag));
        }

        Ok(Self {
            endpoint,
            auth,
            client,
            download_dir: get(ENV_DOWNLOAD_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
        })
    }

    /// Push endpoint and credentials into a client session.
    pub fn apply(&self, restore: &dyn AuthRestore) -> anyhow::Result<()> {
        match &self.endpoint {
            EndpointSource::Absolute(endpoint) => restore
                .set_endpoint(endpoint)
                .with_context(|| format!("invalid {}", ENV_ENDPOINT))?,
            EndpointSource::Parts {
                server,
                controller_id,
                tenant,
            } => restore
                .set_endpoint_parts(server, controller_id, tenant)
                .with_context(|| format!("invalid {}", ENV_SERVER_URL))?,
        }

        match &self.auth {
            AuthSource::None => {}
            AuthSource::DeviceToken(token) => restore.set_device_token(token),
            AuthSource::GatewayToken(token) => restore.set_gateway_token(token),
            AuthSource::Keypair { cert, key } => {
                let cert_pem = std::fs::read_to_string(cert)
                    .with_context(|| format!("failed to read {}", cert.display()))?;
                let key_pem = std::fs::read_to_string(key)
                    .with_context(|| format!("failed to read {}", key.display()))?;
                restore.set_tls(&cert_pem, &key_pem);
            }
        }
        Ok(())
    }
}

fn parse_secs(name: &str, value: &str) -> anyhow::Result<u64> {
    value
        .parse::<u64>()
        .with_context(|| format!("{} must be a whole number of seconds, got '{}'", name, value))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
