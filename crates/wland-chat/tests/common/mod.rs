#![allow(dead_code)]

use anyhow::Result;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use wland_chat::{ChatController, ChatPorts, presentation_for};
use wland_core::{AppConfig, PresentationKind, TransportMode, TypingConfig, WebhookConfig};
use wland_errors::ChatError;
use wland_observe::Observer;
use wland_store::MemoryStore;
use wland_testkit::{FixedSessionIds, ManualClock, RecordingHost, RecordingView};
use wland_webhook::{ChatPayload, WebhookClient, WebhookReply, WebhookTransport};

pub const PAGE_URL: &str = "https://shop.test/contact";
pub const START_MS: i64 = 1_700_000_000_000;

#[derive(Debug, Clone)]
pub enum Scripted {
    Body(String),
    Stream(Vec<String>),
    Fail(ChatError),
}

/// Canned replies, served in order.
pub struct ScriptedTransport {
    endpoint: Option<String>,
    replies: Mutex<VecDeque<Scripted>>,
    sent: Arc<Mutex<Vec<ChatPayload>>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Scripted>) -> Self {
        Self {
            endpoint: Some("https://n8n.test/webhook/chat".to_string()),
            replies: Mutex::new(replies.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            endpoint: None,
            ..Self::new(Vec::new())
        }
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<ChatPayload>>> {
        Arc::clone(&self.sent)
    }
}

impl WebhookTransport for ScriptedTransport {
    fn endpoint(&self) -> Option<String> {
        self.endpoint.clone()
    }

    fn post(&self, payload: &ChatPayload) -> Result<WebhookReply> {
        self.sent.lock().expect("sent").push(payload.clone());
        let next = self
            .replies
            .lock()
            .expect("replies")
            .pop_front()
            .unwrap_or_else(|| Scripted::Fail(ChatError::Format("script exhausted".to_string())));
        match next {
            Scripted::Body(body) => Ok(WebhookReply::Body(body)),
            Scripted::Stream(chunks) => Ok(WebhookReply::Stream(Box::new(Cursor::new(
                chunks.concat().into_bytes(),
            )))),
            Scripted::Fail(err) => Err(err.into()),
        }
    }
}

pub fn test_config(presentation: PresentationKind) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.widget.presentation = presentation;
    cfg.typing = TypingConfig {
        jitter_min: 1.0,
        jitter_max: 1.0,
        ..TypingConfig::default()
    };
    cfg
}

pub fn webhook_client(url: &str, token: Option<&str>) -> WebhookClient {
    WebhookClient::new(WebhookConfig {
        url: url.to_string(),
        auth_token: token.map(ToString::to_string),
        auth_token_env: "WLAND_CHAT_TOKEN_UNSET_FOR_CHAT_TESTS".to_string(),
        timeout_seconds: 5,
        transport: TransportMode::Auto,
    })
    .expect("webhook client")
}

/// Shared fakes; every controller built from one harness sees the same
/// storage, page and clock, like consecutive page loads in one tab.
pub struct Harness {
    pub view: RecordingView,
    pub host: RecordingHost,
    pub clock: Arc<ManualClock>,
    pub tab: Arc<MemoryStore>,
    pub persistent: Arc<MemoryStore>,
    pub ids: FixedSessionIds,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::starting_at(START_MS));
        Self {
            view: RecordingView::new(),
            host: RecordingHost::new(PAGE_URL).with_clock(clock.clone()),
            clock,
            tab: Arc::new(MemoryStore::new()),
            persistent: Arc::new(MemoryStore::new()),
            ids: FixedSessionIds::new(None),
        }
    }

    pub fn with_host(mut self, host: RecordingHost) -> Self {
        self.host = host.with_clock(self.clock.clone());
        self
    }

    /// A fresh page load: new view, same storage and page.
    pub fn reload_view(&mut self) {
        self.view = RecordingView::new();
    }

    pub fn controller(
        &self,
        config: AppConfig,
        transport: Box<dyn WebhookTransport>,
    ) -> ChatController {
        let presentation = presentation_for(config.widget.presentation);
        ChatController::new(
            config,
            presentation,
            ChatPorts {
                view: Box::new(self.view.clone()),
                host: Box::new(self.host.clone()),
                tab_store: self.tab.clone(),
                persistent_store: self.persistent.clone(),
                clock: self.clock.clone(),
                session_ids: Box::new(self.ids.clone()),
                transport,
            },
            Observer::detached(),
        )
    }
}
