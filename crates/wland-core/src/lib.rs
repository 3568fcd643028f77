use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod config;

pub use config::{
    AppConfig, GdprConfig, LogConfig, PresentationKind, RedirectConfig, TransportMode,
    TypingConfig, WebhookConfig, WidgetConfig,
};

/// Tab-scoped key holding the serialized [`ConversationSnapshot`].
pub const CONVERSATION_STATE_KEY: &str = "wland_chat_conversation_state";
/// Tab-scoped sentinel set right before a self-triggered redirect.
pub const REDIRECT_PENDING_KEY: &str = "wland_chat_redirect_pending";
/// Persistent flag recording that the visitor has sent at least one message.
pub const INTERACTED_KEY: &str = "braves_chat_interacted";
/// Persistent flag recording GDPR consent.
pub const GDPR_CONSENT_KEY: &str = "wland_chat_gdpr_consent";

pub const CUSTOM_ACTION_EVENT: &str = "wland_chat_custom_action";
pub const CLOSE_REQUESTED_EVENT: &str = "wland_chat_close_requested";

pub const DEFAULT_REDIRECT_DELAY_MS: u64 = 3000;

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".wland-chat")
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation state persisted across a navigation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub history: Vec<Message>,
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub url: String,
}

/// A reply reduced to its display message plus side-channel directives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub message: String,
    pub is_structured: bool,
    pub has_redirect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub redirect_delay_ms: u64,
    pub has_action: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_data: Option<Value>,
}

impl ParsedResponse {
    /// Unstructured result: the raw text is displayed verbatim.
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_structured: false,
            has_redirect: false,
            redirect_url: None,
            redirect_delay_ms: DEFAULT_REDIRECT_DELAY_MS,
            has_action: false,
            action_type: None,
            action_data: None,
        }
    }

    pub fn has_directives(&self) -> bool {
        self.has_redirect || self.has_action
    }
}

/// Cooperative cancellation flag for an in-flight reveal.
///
/// Clones share the same flag, so a handle can be given to another thread
/// (or a test clock) that calls [`StreamHandle::cancel`] while the renderer
/// is sleeping between characters.
#[derive(Debug, Clone, Default)]
pub struct StreamHandle {
    active: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Opaque handle to a message bubble owned by a [`ChatView`].
pub type MessageHandle = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Modal,
    Fullscreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
    Instant,
    Auto,
}

impl ScrollBehavior {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "instant" => ScrollBehavior::Instant,
            "auto" => ScrollBehavior::Auto,
            _ => ScrollBehavior::Smooth,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScrollBehavior::Smooth => "smooth",
            ScrollBehavior::Instant => "instant",
            ScrollBehavior::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupRequest {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub left: i64,
    pub top: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentNotice {
    pub title: String,
    pub message: String,
    pub accept_label: String,
    pub decline_label: String,
}

/// Rendering surface of the widget. Message bodies are always sanitized HTML.
pub trait ChatView {
    fn show_widget(&mut self, layout: Layout);
    fn hide_widget(&mut self);
    fn show_consent(&mut self, notice: &ConsentNotice);
    fn hide_consent(&mut self);
    fn append_message(&mut self, role: Role, html: &str) -> MessageHandle;
    fn update_message(&mut self, handle: MessageHandle, html: &str);
    fn set_typing_cursor(&mut self, handle: MessageHandle, visible: bool);
    fn set_typing_indicator(&mut self, visible: bool);
    fn set_inputs_enabled(&mut self, enabled: bool);
    fn clear_input(&mut self);
    fn focus_input(&mut self);
    fn scroll_to_bottom(&mut self);
}

/// The page embedding the widget.
pub trait HostPage {
    fn current_url(&self) -> String;
    /// Available screen size, used to centre popups.
    fn screen_size(&self) -> (u32, u32);
    fn open_window(&mut self, request: &PopupRequest) -> Result<()>;
    fn dispatch_event(&mut self, name: &str, detail: &Value) -> Result<()>;
    fn reload(&mut self) -> Result<()>;
    /// Returns `false` when no element matches `selector`.
    fn scroll_into_view(&mut self, selector: &str, behavior: ScrollBehavior) -> Result<bool>;
    fn navigate(&mut self, url: &str) -> Result<()>;
}

/// String key/value storage (tab-scoped or persistent).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        now_millis()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// External fingerprinting collaborator.
pub trait SessionIdProvider {
    /// Returns `None` when no fingerprint is available (yet).
    fn fingerprint(&self) -> Option<String>;
}
