//! Side effects requested by a reply: host-page actions and redirects.

use anyhow::{Result, anyhow};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use wland_core::{
    CLOSE_REQUESTED_EVENT, CUSTOM_ACTION_EVENT, ChatView, Clock, HostPage, Message,
    MessageHandle, PopupRequest, RedirectConfig, Role, ScrollBehavior,
};
use wland_errors::ChatError;
use wland_observe::Observer;
use wland_render::escape_html;
use wland_store::ConversationStore;

const DEFAULT_POPUP_WIDTH: u32 = 800;
const DEFAULT_POPUP_HEIGHT: u32 = 600;
const DEFAULT_RELOAD_DELAY_MS: u64 = 1000;
const COUNTDOWN_STEP_MS: u64 = 1000;

pub type ErrorCallback = Box<dyn FnMut(&ChatError)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub action: String,
    pub succeeded: bool,
    /// The reply asked the widget to close itself.
    pub close_requested: bool,
}

/// Executes `action` directives against the host page.
pub struct ActionDispatcher {
    clock: Arc<dyn Clock>,
    observer: Observer,
    on_error: Option<ErrorCallback>,
}

impl ActionDispatcher {
    pub fn new(clock: Arc<dyn Clock>, observer: Observer) -> Self {
        Self {
            clock,
            observer,
            on_error: None,
        }
    }

    pub fn on_error(&mut self, callback: ErrorCallback) {
        self.on_error = Some(callback);
    }

    /// Never fails: errors are logged and handed to the error callback.
    pub fn execute(
        &mut self,
        host: &mut dyn HostPage,
        action_type: &str,
        data: Option<&Value>,
    ) -> DispatchOutcome {
        let empty = Value::Object(Map::new());
        let data = data.unwrap_or(&empty);
        self.observer
            .verbose_log(&format!("executing action {action_type}"));

        let result = match action_type {
            "open_modal" => self.open_modal(host, data),
            "trigger_event" => trigger_event(host, data),
            "close_chat" => host.dispatch_event(CLOSE_REQUESTED_EVENT, &json!({})),
            "reload_page" => self.reload_page(host, data),
            "scroll_to" => self.scroll_to(host, data),
            other => host.dispatch_event(
                CUSTOM_ACTION_EVENT,
                &json!({ "action": other, "data": data }),
            ),
        };

        match result {
            Ok(()) => DispatchOutcome {
                action: action_type.to_string(),
                succeeded: true,
                close_requested: action_type == "close_chat",
            },
            Err(err) => {
                let error = ChatError::Action {
                    action: action_type.to_string(),
                    detail: format!("{err:#}"),
                };
                self.observer.warn_log(&error.to_string());
                if let Some(callback) = self.on_error.as_mut() {
                    callback(&error);
                }
                DispatchOutcome {
                    action: action_type.to_string(),
                    succeeded: false,
                    close_requested: false,
                }
            }
        }
    }

    fn open_modal(&self, host: &mut dyn HostPage, data: &Value) -> Result<()> {
        let url = string_field(data, "url").ok_or_else(|| anyhow!("open_modal requires a url"))?;
        let width = number_field(data, "width")
            .and_then(|w| u32::try_from(w).ok())
            .unwrap_or(DEFAULT_POPUP_WIDTH);
        let height = number_field(data, "height")
            .and_then(|h| u32::try_from(h).ok())
            .unwrap_or(DEFAULT_POPUP_HEIGHT);
        let (screen_w, screen_h) = host.screen_size();
        let request = PopupRequest {
            url: url.to_string(),
            width,
            height,
            left: ((i64::from(screen_w) - i64::from(width)) / 2).max(0),
            top: ((i64::from(screen_h) - i64::from(height)) / 2).max(0),
        };
        host.open_window(&request)
    }

    fn reload_page(&self, host: &mut dyn HostPage, data: &Value) -> Result<()> {
        let delay = number_field(data, "delay").unwrap_or(DEFAULT_RELOAD_DELAY_MS);
        self.clock.sleep(Duration::from_millis(delay));
        host.reload()
    }

    fn scroll_to(&self, host: &mut dyn HostPage, data: &Value) -> Result<()> {
        let Some(selector) = string_field(data, "selector") else {
            self.observer.warn_log("scroll_to without a selector ignored");
            return Ok(());
        };
        let behavior = string_field(data, "behavior")
            .map(ScrollBehavior::parse)
            .unwrap_or(ScrollBehavior::Smooth);
        if !host.scroll_into_view(selector, behavior)? {
            self.observer
                .warn_log(&format!("scroll_to: no element matches {selector}"));
        }
        Ok(())
    }
}

fn trigger_event(host: &mut dyn HostPage, data: &Value) -> Result<()> {
    let name = string_field(data, "event_name")
        .ok_or_else(|| anyhow!("trigger_event requires an event_name"))?;
    let detail = data
        .get("detail")
        .filter(|d| !d.is_null())
        .cloned()
        .unwrap_or_else(|| json!({}));
    host.dispatch_event(name, &detail)
}

fn string_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Accepts `800`, `800.0` and `"800"`.
fn number_field(data: &Value, key: &str) -> Option<u64> {
    match data.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct RedirectRequest<'a> {
    pub url: &'a str,
    pub delay_ms: u64,
    pub history: &'a [Message],
    pub session_id: &'a str,
}

/// Where the countdown is shown.
pub struct RedirectContext<'a> {
    pub view: &'a mut dyn ChatView,
    pub host: &'a mut dyn HostPage,
    /// The bot bubble currently on screen and its rendered HTML.
    pub bubble: Option<(MessageHandle, String)>,
}

/// Persists the conversation, counts down, then leaves the page.
#[derive(Clone)]
pub struct RedirectExecutor {
    store: ConversationStore,
    clock: Arc<dyn Clock>,
    cfg: RedirectConfig,
    observer: Observer,
}

impl RedirectExecutor {
    pub fn new(
        store: ConversationStore,
        clock: Arc<dyn Clock>,
        cfg: RedirectConfig,
        observer: Observer,
    ) -> Self {
        Self {
            store,
            clock,
            cfg,
            observer,
        }
    }

    /// Returns the URL navigated to.
    pub fn execute_redirect(
        &self,
        request: &RedirectRequest<'_>,
        ctx: RedirectContext<'_>,
    ) -> Result<String> {
        let origin = ctx.host.current_url();
        self.store
            .save(request.history, request.session_id, &origin);
        self.store.mark_redirect_pending();
        self.observer.verbose_log(&format!(
            "redirecting to {} in {}ms",
            request.url, request.delay_ms
        ));

        let (bubble, base_html) = match ctx.bubble {
            Some((handle, html)) => (handle, html),
            None => (ctx.view.append_message(Role::Assistant, ""), String::new()),
        };
        let mut remaining = request.delay_ms;
        self.show_notice(ctx.view, bubble, &base_html, remaining);
        while remaining > 0 {
            let step = remaining.min(COUNTDOWN_STEP_MS);
            self.clock.sleep(Duration::from_millis(step));
            remaining -= step;
            if remaining > 0 {
                self.show_notice(ctx.view, bubble, &base_html, remaining);
            }
        }

        ctx.host.navigate(request.url)?;
        Ok(request.url.to_string())
    }

    fn show_notice(
        &self,
        view: &mut dyn ChatView,
        bubble: MessageHandle,
        base_html: &str,
        remaining_ms: u64,
    ) {
        let seconds = remaining_ms.div_ceil(1000);
        let notice = escape_html(&self.cfg.notice(seconds));
        view.update_message(
            bubble,
            &format!(r#"{base_html}<div class="wland-redirect-notice">{notice}</div>"#),
        );
        view.scroll_to_bottom();
    }
}
