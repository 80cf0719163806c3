//! Action documents exchanged with the server.

use std::collections::BTreeMap;
use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::client::DdiClient;
use crate::error::{DdiError, Result};

/// Server-assigned action identifier. Negative means "no action".
pub type ActionId = i64;

/// Kind of action announced by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    None,
    ConfigData,
    CancelAction,
    DeploymentBase,
}

/// How configuration data is applied on the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Merge,
    Replace,
    Remove,
}

/// Configuration data the device wants to upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigRequest {
    pub data: BTreeMap<String, String>,
    pub mode: Mode,
    pub ignore_sleep: bool,
}

impl ConfigRequest {
    pub fn new(data: BTreeMap<String, String>, mode: Mode) -> Self {
        Self {
            data,
            mode,
            ignore_sleep: false,
        }
    }

    /// Nothing to upload.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_ignore_sleep(mut self, ignore_sleep: bool) -> Self {
        self.ignore_sleep = ignore_sleep;
        self
    }

    pub fn is_ignored_sleep(&self) -> bool {
        self.ignore_sleep
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

fn parse_action_id(raw: Option<RawId>, field: &str) -> Result<ActionId> {
    let id = match raw {
        Some(RawId::Number(value)) => value,
        Some(RawId::Text(value)) => value
            .trim()
            .parse::<i64>()
            .map_err(|_| DdiError::malformed(format!("{} is not numeric: {:?}", field, value)))?,
        None => return Err(DdiError::malformed(format!("missing {}", field))),
    };
    if id < 0 {
        return Err(DdiError::malformed(format!("negative {}: {}", field, id)));
    }
    Ok(id)
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Link {
    pub href: String,
}

pub(crate) fn parse_link(link: &Link) -> Result<Url> {
    Url::parse(&link.href)
        .map_err(|e| DdiError::malformed(format!("bad link {}: {}", link.href, e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancel Action
// ─────────────────────────────────────────────────────────────────────────────

/// Request to stop a running action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelAction {
    pub id: ActionId,
    pub stop_id: ActionId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCancelAction {
    id: Option<RawId>,
    cancel_action: Option<RawCancelDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCancelDetails {
    stop_id: Option<RawId>,
}

impl CancelAction {
    pub fn from_json(body: &str) -> Result<Self> {
        let raw: RawCancelAction = serde_json::from_str(body)?;
        let id = parse_action_id(raw.id, "id")?;
        let details = raw
            .cancel_action
            .ok_or_else(|| DdiError::malformed("missing cancelAction"))?;
        Ok(Self {
            id,
            stop_id: parse_action_id(details.stop_id, "cancelAction.stopId")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deployment Base
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a download or update step should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlingType {
    Skip,
    Attempt,
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceWindow {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hashes {
    pub sha1: String,
    pub md5: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionHistory {
    pub status: String,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// A deployment offered to the device.
#[derive(Debug, Clone)]
pub struct DeploymentBase {
    pub id: ActionId,
    pub download: HandlingType,
    pub update: HandlingType,
    pub maintenance_window: Option<MaintenanceWindow>,
    pub chunks: Vec<Chunk>,
    pub action_history: Option<ActionHistory>,
}

/// A software module within a deployment.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub part: String,
    pub version: String,
    pub name: String,
    pub metadata: Vec<Metadata>,
    pub artifacts: Vec<Artifact>,
}

/// A downloadable file, bound to the client that decoded it.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub filename: String,
    pub hashes: Hashes,
    pub size: u64,
    download_url: Option<Url>,
    md5sum_url: Option<Url>,
    client: DdiClient,
}

impl Artifact {
    pub fn download_url(&self) -> Option<&Url> {
        self.download_url.as_ref()
    }

    pub fn md5sum_url(&self) -> Option<&Url> {
        self.md5sum_url.as_ref()
    }

    fn require_download_url(&self) -> Result<&Url> {
        self.download_url.as_ref().ok_or_else(|| {
            DdiError::malformed(format!("artifact {} has no download link", self.filename))
        })
    }

    /// Stream the artifact into `path`.
    pub async fn download_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let url = self.require_download_url()?;
        self.client.download_to(url, path.as_ref()).await
    }

    /// Stream the artifact into `receiver`; returning `false` stops the transfer.
    pub async fn download_with<F>(&self, receiver: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> bool + Send,
    {
        let url = self.require_download_url()?;
        self.client.download_with(url, receiver).await
    }

    /// Fetch the server-provided md5sum file.
    pub async fn md5sum(&self) -> Result<String> {
        let url = self.md5sum_url.as_ref().ok_or_else(|| {
            DdiError::malformed(format!("artifact {} has no md5sum link", self.filename))
        })?;
        self.client.get_body(url).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeploymentBase {
    id: Option<RawId>,
    deployment: Option<RawDeployment>,
    #[serde(default)]
    action_history: Option<ActionHistory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeployment {
    download: HandlingType,
    update: HandlingType,
    #[serde(default)]
    maintenance_window: Option<MaintenanceWindow>,
    #[serde(default)]
    chunks: Vec<RawChunk>,
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    part: String,
    version: String,
    name: String,
    #[serde(default)]
    metadata: Vec<Metadata>,
    #[serde(default)]
    artifacts: Vec<RawArtifact>,
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    filename: String,
    hashes: Hashes,
    size: u64,
    #[serde(rename = "_links", default)]
    links: ArtifactLinks,
}

#[derive(Debug, Default, Deserialize)]
struct ArtifactLinks {
    download: Option<Link>,
    #[serde(rename = "download-http")]
    download_http: Option<Link>,
    md5sum: Option<Link>,
    #[serde(rename = "md5sum-http")]
    md5sum_http: Option<Link>,
}

fn preferred_link(primary: Option<&Link>, fallback: Option<&Link>) -> Result<Option<Url>> {
    primary.or(fallback).map(parse_link).transpose()
}

impl Artifact {
    fn from_raw(raw: RawArtifact, client: &DdiClient) -> Result<Self> {
        let links = &raw.links;
        Ok(Self {
            download_url: preferred_link(links.download.as_ref(), links.download_http.as_ref())?,
            md5sum_url: preferred_link(links.md5sum.as_ref(), links.md5sum_http.as_ref())?,
            filename: raw.filename,
            hashes: raw.hashes,
            size: raw.size,
            client: client.clone(),
        })
    }
}

impl DeploymentBase {
    /// Decode a deployment document, binding artifacts to `client` for transfers.
    pub fn from_json(body: &str, client: &DdiClient) -> Result<Self> {
        let raw: RawDeploymentBase = serde_json::from_str(body)?;
        let id = parse_action_id(raw.id, "id")?;
        let deployment = raw
            .deployment
            .ok_or_else(|| DdiError::malformed("missing deployment"))?;

        let chunks = deployment
            .chunks
            .into_iter()
            .map(|chunk| {
                let artifacts = chunk
                    .artifacts
                    .into_iter()
                    .map(|artifact| Artifact::from_raw(artifact, client))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Chunk {
                    part: chunk.part,
                    version: chunk.version,
                    name: chunk.name,
                    metadata: chunk.metadata,
                    artifacts,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            download: deployment.download,
            update: deployment.update,
            maintenance_window: deployment.maintenance_window,
            chunks,
            action_history: raw.action_history,
        })
    }

    /// All artifacts across chunks.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.chunks.iter().flat_map(|chunk| chunk.artifacts.iter())
    }
}
