//! Error taxonomy and user-facing diagnostics for the chat widget.
//!
//! Every failure of a send/receive cycle ends up as a [`Diagnostic`] that the
//! controller renders as a bot message. Typed [`ChatError`]s map to a kind
//! directly; foreign errors are classified by message patterns.

use anyhow::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("webhook URL is not configured")]
    Configuration,
    #[error("authentication failed (HTTP {status}) for {url}")]
    Auth { status: u16, url: String },
    #[error("webhook not found (HTTP 404): {url}")]
    NotFound { url: String },
    #[error("server error (HTTP {status}) from {url}: {detail}")]
    Server {
        status: u16,
        url: String,
        detail: String,
    },
    #[error("unexpected HTTP status {status} from {url}: {detail}")]
    Http {
        status: u16,
        url: String,
        detail: String,
    },
    #[error("request timed out after {seconds}s: {url}")]
    Timeout { url: String, seconds: u64 },
    #[error("network error reaching {url}: {detail}")]
    Transport { url: String, detail: String },
    #[error("invalid JSON in response: {0}")]
    Parse(String),
    #[error("response format error: {0}")]
    Format(String),
    #[error("action '{action}' failed: {detail}")]
    Action { action: String, detail: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Maps a non-success HTTP status to the matching variant.
    pub fn from_status(status: u16, url: &str, body: &str) -> Self {
        let detail: String = body.chars().take(200).collect();
        match status {
            401 | 403 => ChatError::Auth {
                status,
                url: url.to_string(),
            },
            404 => ChatError::NotFound {
                url: url.to_string(),
            },
            500 | 502 | 503 => ChatError::Server {
                status,
                url: url.to_string(),
                detail,
            },
            _ => ChatError::Http {
                status,
                url: url.to_string(),
                detail,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Configuration => ErrorKind::NotConfigured,
            ChatError::Auth { .. } => ErrorKind::Auth,
            ChatError::NotFound { .. } => ErrorKind::NotFound,
            ChatError::Server { .. } => ErrorKind::Server,
            ChatError::Http { .. } => ErrorKind::Unknown,
            ChatError::Timeout { .. } => ErrorKind::Timeout,
            ChatError::Transport { .. } => ErrorKind::Network,
            ChatError::Parse(_) => ErrorKind::JsonParse,
            ChatError::Format(_) => ErrorKind::ResponseFormat,
            ChatError::Action { .. } => ErrorKind::Action,
            ChatError::Storage(_) => ErrorKind::Storage,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    NotConfigured,
    Auth,
    NotFound,
    JsonParse,
    ResponseFormat,
    Server,
    Action,
    Storage,
    Unknown,
}

impl ErrorKind {
    pub fn emoji(&self) -> &'static str {
        match self {
            ErrorKind::Network | ErrorKind::Timeout => "🌐",
            ErrorKind::NotConfigured => "🔧",
            ErrorKind::Auth => "🔒",
            ErrorKind::NotFound => "🔍",
            ErrorKind::JsonParse | ErrorKind::ResponseFormat => "📋",
            ErrorKind::Server => "🔥",
            ErrorKind::Action => "⚡",
            ErrorKind::Storage => "💾",
            ErrorKind::Unknown => "❓",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Connection error",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::NotConfigured => "Webhook not configured",
            ErrorKind::Auth => "Authentication failed",
            ErrorKind::NotFound => "Webhook not found",
            ErrorKind::JsonParse => "Invalid JSON response",
            ErrorKind::ResponseFormat => "Unexpected response format",
            ErrorKind::Server => "Webhook server error",
            ErrorKind::Action => "Action failed",
            ErrorKind::Storage => "Storage unavailable",
            ErrorKind::Unknown => "Unexpected error",
        }
    }

    pub fn likely_reasons(&self) -> &'static [&'static str] {
        match self {
            ErrorKind::Network => &[
                "The webhook host is unreachable or refused the connection",
                "A firewall, proxy or CORS policy blocked the request",
                "The device is offline",
            ],
            ErrorKind::Timeout => &[
                "The workflow took longer than the configured timeout",
                "The webhook host is overloaded",
            ],
            ErrorKind::NotConfigured => &[
                "No webhook URL has been set in the widget settings",
                "The WLAND_CHAT_WEBHOOK_URL override is empty",
            ],
            ErrorKind::Auth => &[
                "The X-N8N-Auth token is missing or wrong",
                "The webhook requires different credentials",
            ],
            ErrorKind::NotFound => &[
                "The webhook URL is mistyped",
                "The workflow is inactive or was deleted",
                "A test URL is used while the workflow only listens on production",
            ],
            ErrorKind::JsonParse => &[
                "The workflow returned malformed JSON",
                "A proxy replaced the response with an HTML error page",
            ],
            ErrorKind::ResponseFormat => &[
                "The workflow response has no message/output/text field",
                "The response body was empty",
            ],
            ErrorKind::Server => &[
                "The workflow failed while processing the message",
                "The webhook host is restarting or overloaded",
            ],
            ErrorKind::Action => &["The page rejected an action requested by the reply"],
            ErrorKind::Storage => &["Browser storage is full or disabled"],
            ErrorKind::Unknown => &["An unexpected condition occurred while sending the message"],
        }
    }
}

/// Classifies an error message by pattern when no typed error is available.
pub fn classify_message(error_message: &str) -> ErrorKind {
    let lower = error_message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["timed out", "timeout"]) {
        return ErrorKind::Timeout;
    }
    if has(&[
        "failed to fetch",
        "network",
        "connection",
        "dns",
        "unreachable",
    ]) {
        return ErrorKind::Network;
    }
    if has(&["not configured", "webhook url"]) {
        return ErrorKind::NotConfigured;
    }
    if has(&["401", "403", "unauthorized", "forbidden", "authentication"]) {
        return ErrorKind::Auth;
    }
    if has(&["404", "not found"]) {
        return ErrorKind::NotFound;
    }
    if has(&["json", "parse", "unexpected token"]) {
        return ErrorKind::JsonParse;
    }
    if has(&["format", "no message", "extract"]) {
        return ErrorKind::ResponseFormat;
    }
    if has(&["500", "502", "503", "server error"]) {
        return ErrorKind::Server;
    }
    ErrorKind::Unknown
}

/// User-facing rendering of a failed exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub title: String,
    pub reasons: Vec<String>,
    pub detail: String,
    pub webhook_url: Option<String>,
    pub at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            title: kind.title().to_string(),
            reasons: kind
                .likely_reasons()
                .iter()
                .map(|r| (*r).to_string())
                .collect(),
            detail: detail.into(),
            webhook_url: None,
            at: Utc::now(),
        }
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if !url.trim().is_empty() {
            self.webhook_url = Some(url);
        }
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// Markdown text suitable for the chat message renderer.
    pub fn format(&self) -> String {
        let mut output = format!("{} **{}**\n", self.kind.emoji(), self.title);

        if !self.reasons.is_empty() {
            output.push_str("\n**Possible causes:**\n");
            for reason in &self.reasons {
                output.push_str(&format!("- {reason}\n"));
            }
        }

        output.push_str(&format!("\n**Technical details:** {}\n", self.detail));
        if let Some(url) = &self.webhook_url {
            output.push_str(&format!("**Webhook:** {url}\n"));
        }
        output.push_str(&format!(
            "**Time:** {}",
            self.at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// Turns any error of the send/receive cycle into a [`Diagnostic`].
#[derive(Debug, Clone, Default)]
pub struct ErrorHandler {
    webhook_url: Option<String>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn webhook_url(mut self, url: Option<String>) -> Self {
        self.webhook_url = url;
        self
    }

    pub fn handle(&self, error: &Error) -> Diagnostic {
        let kind = match error.downcast_ref::<ChatError>() {
            Some(chat_error) => chat_error.kind(),
            None => classify_message(&format!("{error:#}")),
        };
        let diagnostic = Diagnostic::new(kind, format!("{error:#}"));
        match &self.webhook_url {
            Some(url) => diagnostic.with_webhook_url(url.clone()),
            None => diagnostic,
        }
    }
}
