//! Spool record model and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel tag persisted for composed (email) messages.
pub const GENERIC_CHANNEL: &str = "generic";

/// Channel tag persisted for SMS messages.
pub const SMS_CHANNEL: &str = "sms";

/// Lifecycle status of a spooled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Queued and waiting for a flush pass.
    Ready,
    /// Picked up by a flush pass, delivery in progress.
    Processing,
    /// Delivered.
    Complete,
}

impl RecordStatus {
    /// Check if this status allows moving to `target`.
    ///
    /// SMS records skip `Processing` and go straight to `Complete`.
    pub fn can_transition_to(&self, target: RecordStatus) -> bool {
        use RecordStatus::*;

        matches!(
            (self, target),
            (Ready, Processing) | (Ready, Complete) | (Processing, Complete)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Complete => "complete",
        }
    }

    /// Parse a status string from the DB.
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "processing" => Some(Self::Processing),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully composed outbound email.
///
/// The transport owns the wire encoding; the spool only stores and hands
/// this over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedMessage {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl ComposedMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: vec![to.into()],
            cc: Vec::new(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc.push(cc.into());
        self
    }

    /// All envelope recipients (to + cc).
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to.iter().chain(self.cc.iter()).map(String::as_str)
    }
}

/// A record waiting to be inserted. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub channel: String,
    pub recipient: String,
    pub body: String,
    pub message: Option<ComposedMessage>,
}

impl NewRecord {
    /// A generic record carrying a composed message.
    pub fn generic(message: &ComposedMessage) -> Self {
        Self {
            channel: GENERIC_CHANNEL.to_string(),
            recipient: message.to.join(", "),
            body: message.body.clone(),
            message: Some(message.clone()),
        }
    }

    pub fn sms(body: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            channel: SMS_CHANNEL.to_string(),
            recipient: recipient.into(),
            body: body.into(),
            message: None,
        }
    }
}

/// A persisted spool record.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    /// Raw channel tag as stored; classified by the router.
    pub channel: String,
    pub recipient: String,
    pub body: String,
    pub message: Option<ComposedMessage>,
    pub status: RecordStatus,
    pub send_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    /// The message to hand to a transport.
    ///
    /// Records without a stored composition (unknown channel tags, legacy
    /// rows) fall back to a bare message built from recipient and body.
    pub fn composed(&self) -> ComposedMessage {
        match &self.message {
            Some(message) => message.clone(),
            None => ComposedMessage {
                from: String::new(),
                to: self
                    .recipient
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                cc: Vec::new(),
                subject: String::new(),
                body: self.body.clone(),
            },
        }
    }
}

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub ready: usize,
    pub processing: usize,
    pub complete: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.ready + self.processing + self.complete
    }
}
