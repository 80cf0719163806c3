//! Feedback produced by handlers and the status documents sent to the server.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ActionId, Mode};

/// Overall result of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finished {
    Success,
    Failure,
    None,
}

/// Execution state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    Closed,
    Proceeding,
    Canceled,
    Scheduled,
    Rejected,
    Resumed,
    Downloaded,
    Download,
}

/// Notified about delivery of a feedback document, not about the action itself.
pub trait DeliveryListener: Send + Sync {
    /// The server accepted the feedback.
    fn on_successful_delivery(&self);

    /// The server answered the feedback POST with an unexpected status.
    fn on_error(&self);
}

/// Outcome reported by an action handler.
#[derive(Clone)]
pub struct Feedback {
    finished: Finished,
    execution: Execution,
    details: Vec<String>,
    ignore_sleep: bool,
    delivery_listener: Option<Arc<dyn DeliveryListener>>,
}

impl Feedback {
    pub fn new(finished: Finished, execution: Execution) -> Self {
        Self {
            finished,
            execution,
            details: Vec::new(),
            ignore_sleep: false,
            delivery_listener: None,
        }
    }

    /// Shorthand for `success` / `closed`.
    pub fn success() -> Self {
        Self::new(Finished::Success, Execution::Closed)
    }

    /// Shorthand for `failure` / `closed`.
    pub fn failure() -> Self {
        Self::new(Finished::Failure, Execution::Closed)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn with_details<I, S>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.details.extend(details.into_iter().map(Into::into));
        self
    }

    /// Ask the loop to poll again right away instead of sleeping.
    pub fn with_ignore_sleep(mut self, ignore_sleep: bool) -> Self {
        self.ignore_sleep = ignore_sleep;
        self
    }

    pub fn with_delivery_listener(mut self, listener: Arc<dyn DeliveryListener>) -> Self {
        self.delivery_listener = Some(listener);
        self
    }

    pub fn finished(&self) -> Finished {
        self.finished
    }

    pub fn execution(&self) -> Execution {
        self.execution
    }

    pub fn details(&self) -> &[String] {
        &self.details
    }

    pub fn is_ignored_sleep(&self) -> bool {
        self.ignore_sleep
    }

    pub fn delivery_listener(&self) -> Option<&Arc<dyn DeliveryListener>> {
        self.delivery_listener.as_ref()
    }
}

impl fmt::Debug for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feedback")
            .field("finished", &self.finished)
            .field("execution", &self.execution)
            .field("details", &self.details)
            .field("ignore_sleep", &self.ignore_sleep)
            .field("has_delivery_listener", &self.delivery_listener.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire documents
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ResultDocument {
    finished: Finished,
}

#[derive(Debug, Serialize)]
struct StatusDocument<'a> {
    result: ResultDocument,
    execution: Execution,
    details: &'a [String],
}

impl<'a> From<&'a Feedback> for StatusDocument<'a> {
    fn from(feedback: &'a Feedback) -> Self {
        Self {
            result: ResultDocument {
                finished: feedback.finished,
            },
            execution: feedback.execution,
            details: &feedback.details,
        }
    }
}

#[derive(Debug, Serialize)]
struct FeedbackDocument<'a> {
    status: StatusDocument<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConfigDataDocument<'a> {
    data: &'a BTreeMap<String, String>,
    mode: Mode,
    status: StatusDocument<'a>,
}

/// Encode the action feedback body. The id is omitted when negative.
pub fn encode_feedback(feedback: &Feedback, action_id: ActionId) -> Result<String> {
    let document = FeedbackDocument {
        status: feedback.into(),
        id: (action_id >= 0).then(|| action_id.to_string()),
    };
    Ok(serde_json::to_string(&document)?)
}

/// Encode the config-data body with a synthesized `success` / `closed` status.
pub fn encode_config_data(data: &BTreeMap<String, String>, mode: Mode) -> Result<String> {
    let status = Feedback::success();
    let document = ConfigDataDocument {
        data,
        mode,
        status: (&status).into(),
    };
    Ok(serde_json::to_string(&document)?)
}

/// Feedback resource for an action URI: its path with exactly one `/` before `feedback`.
pub fn feedback_url(follow: &Url) -> Url {
    let mut url = follow.clone();
    let mut path = follow.path().to_string();
    if !path.ends_with('/') {
        path.push('/');
    }
    path.push_str("feedback");
    url.set_path(&path);
    url.set_query(None);
    url
}
