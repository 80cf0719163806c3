//! Device-side client for the hawkBit Direct Device Integration (DDI) API.
//!
//! A [`DdiClient`] polls the server, dispatches the announced action to an
//! [`EventHandler`], and reports the outcome back as a feedback document.
//! Requests answered with 401 are retried once after the [`AuthErrorHandler`]
//! had a chance to refresh the credentials.

mod actions;
mod client;
mod config;
mod credentials;
mod error;
mod feedback;
mod handler;
mod poll;
mod transfer;
mod types;

#[cfg(test)]
mod test_support;

pub use client::{DdiClient, DdiClientBuilder};
pub use config::{ClientConfig, DEFAULT_SLEEP_SECS, DEFAULT_TIMEOUT_SECS};
pub use credentials::{
    build_http_client, endpoint_from_parts, AuthRestore, Credentials, SessionState,
    DEFAULT_TENANT,
};
pub use error::{DdiError, ErrorKind, Result};
pub use feedback::{
    encode_config_data, encode_feedback, feedback_url, DeliveryListener, Execution, Feedback,
    Finished,
};
pub use handler::{AuthErrorHandler, EventHandler};
pub use poll::{Iteration, PendingAction, PollDirective, Sleeper, TokioSleeper};
pub use types::{
    ActionHistory, ActionId, ActionKind, Artifact, CancelAction, Chunk, ConfigRequest,
    DeploymentBase, HandlingType, Hashes, MaintenanceWindow, Metadata, Mode,
};

pub use tokio_util::sync::CancellationToken;
