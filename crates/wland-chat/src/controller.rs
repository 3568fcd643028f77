use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use wland_actions::{
    ActionDispatcher, DispatchOutcome, RedirectContext, RedirectExecutor, RedirectRequest,
};
use wland_core::{
    AppConfig, ChatView, Clock, ConsentNotice, HostPage, KeyValueStore, Message, MessageHandle,
    ParsedResponse, Role, SessionIdProvider, StreamHandle,
};
use wland_errors::{ChatError, Diagnostic, ErrorHandler};
use wland_observe::Observer;
use wland_render::{StreamRenderer, escape_html, render_markdown};
use wland_store::{ConversationStore, InteractionFlags};
use wland_webhook::{ChatPayload, WebhookReply, WebhookTransport, extract_reply, parse_response};

use crate::presentation::{BufferedReveal, Presentation};
use crate::session::{is_temporary, resolve_session_id};

/// Everything the controller talks to.
pub struct ChatPorts {
    pub view: Box<dyn ChatView>,
    pub host: Box<dyn HostPage>,
    /// Survives a navigation but not the visit.
    pub tab_store: Arc<dyn KeyValueStore>,
    /// Survives visits.
    pub persistent_store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub session_ids: Box<dyn SessionIdProvider>,
    pub transport: Box<dyn WebhookTransport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Empty or whitespace-only input.
    Ignored,
    /// Consent has not been given yet.
    ConsentRequired,
    Replied,
    /// A diagnostic was shown instead of a reply.
    Failed,
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub status: SendStatus,
    pub reply: Option<String>,
    pub streamed: bool,
    pub cancelled: bool,
    pub diagnostic: Option<Diagnostic>,
    pub actions: Vec<DispatchOutcome>,
    pub action_errors: Vec<ChatError>,
    pub redirected_to: Option<String>,
}

impl SendOutcome {
    fn with_status(status: SendStatus) -> Self {
        Self {
            status,
            reply: None,
            streamed: false,
            cancelled: false,
            diagnostic: None,
            actions: Vec::new(),
            action_errors: Vec::new(),
            redirected_to: None,
        }
    }
}

/// One bot reply after transport and nested-directive parsing.
struct Reply {
    parsed: ParsedResponse,
    bubble: MessageHandle,
    streamed: bool,
    cancelled: bool,
}

/// Drives one widget instance: lifecycle, consent gate and the
/// send/receive pipeline.
pub struct ChatController {
    config: AppConfig,
    presentation: Box<dyn Presentation>,
    view: Box<dyn ChatView>,
    host: Box<dyn HostPage>,
    transport: Box<dyn WebhookTransport>,
    session_ids: Box<dyn SessionIdProvider>,
    clock: Arc<dyn Clock>,
    conversation: ConversationStore,
    flags: InteractionFlags,
    renderer: StreamRenderer,
    dispatcher: ActionDispatcher,
    redirects: RedirectExecutor,
    observer: Observer,
    stream: StreamHandle,
    action_errors: Rc<RefCell<Vec<ChatError>>>,
    history: Vec<Message>,
    session_id: String,
    state: WidgetState,
    gdpr_locked: bool,
    last_bot_bubble: Option<MessageHandle>,
}

impl ChatController {
    pub fn new(
        config: AppConfig,
        presentation: Box<dyn Presentation>,
        ports: ChatPorts,
        observer: Observer,
    ) -> Self {
        let stream = StreamHandle::new();
        let conversation = ConversationStore::new(
            ports.tab_store.clone(),
            ports.clock.clone(),
            observer.clone(),
        );
        let flags = InteractionFlags::new(ports.persistent_store.clone(), observer.clone());
        let renderer = StreamRenderer::new(
            config.typing.clone(),
            ports.clock.clone(),
            stream.clone(),
            observer.clone(),
        );
        let action_errors = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = ActionDispatcher::new(ports.clock.clone(), observer.clone());
        let sink = Rc::clone(&action_errors);
        dispatcher.on_error(Box::new(move |err: &ChatError| {
            sink.borrow_mut().push(err.clone());
        }));
        let redirects = RedirectExecutor::new(
            conversation.clone(),
            ports.clock.clone(),
            config.redirect.clone(),
            observer.clone(),
        );
        let session_id = resolve_session_id(ports.session_ids.as_ref(), ports.clock.now_ms());

        Self {
            config,
            presentation,
            view: ports.view,
            host: ports.host,
            transport: ports.transport,
            session_ids: ports.session_ids,
            clock: ports.clock,
            conversation,
            flags,
            renderer,
            dispatcher,
            redirects,
            observer,
            stream,
            action_errors,
            history: Vec::new(),
            session_id,
            state: WidgetState::Closed,
            gdpr_locked: false,
            last_bot_bubble: None,
        }
    }

    /// Page-load restoration. The widget stays closed; returns how many
    /// messages were replayed.
    pub fn initialize(&mut self) -> usize {
        self.session_id = resolve_session_id(self.session_ids.as_ref(), self.clock.now_ms());
        let after_own_redirect = self.conversation.check_and_clear_redirect_pending();
        let Some(snapshot) = self.conversation.restore() else {
            return 0;
        };
        for message in &snapshot.history {
            let html = match message.role {
                Role::User => escape_html(&message.content),
                Role::Assistant => render_markdown(&message.content),
            };
            let handle = self.view.append_message(message.role, &html);
            if message.role == Role::Assistant {
                self.last_bot_bubble = Some(handle);
            }
        }
        if after_own_redirect && !snapshot.session_id.is_empty() {
            self.session_id = snapshot.session_id.clone();
        }
        self.history = snapshot.history;
        self.observer.verbose_log(&format!(
            "replayed {} messages (redirect: {after_own_redirect})",
            self.history.len()
        ));
        self.history.len()
    }

    pub fn open(&mut self) {
        self.state = WidgetState::Open;
        self.presentation.open(self.view.as_mut());
        if self.config.gdpr.enabled && !self.flags.has_consent() {
            self.gdpr_locked = true;
            let gdpr = &self.config.gdpr;
            self.view.show_consent(&ConsentNotice {
                title: gdpr.title.clone(),
                message: gdpr.message.clone(),
                accept_label: gdpr.accept_label.clone(),
                decline_label: gdpr.decline_label.clone(),
            });
        } else {
            self.gdpr_locked = false;
            self.view.focus_input();
        }
    }

    pub fn close(&mut self) {
        self.cancel_stream();
        self.state = WidgetState::Closed;
        self.presentation.close(self.view.as_mut());
    }

    pub fn accept_consent(&mut self) {
        self.flags.accept_consent();
        if is_temporary(&self.session_id) {
            let resolved = resolve_session_id(self.session_ids.as_ref(), self.clock.now_ms());
            if !is_temporary(&resolved) {
                self.session_id = resolved;
            }
        }
        self.gdpr_locked = false;
        self.view.hide_consent();
        self.view.focus_input();
    }

    pub fn decline_consent(&mut self) {
        self.view.hide_consent();
        self.close();
    }

    /// Stops an in-flight reveal before its next character or word.
    pub fn cancel_stream(&mut self) {
        self.stream.cancel();
        if let Some(bubble) = self.last_bot_bubble {
            self.view.set_typing_cursor(bubble, false);
        }
    }

    pub fn stream_handle(&self) -> StreamHandle {
        self.stream.clone()
    }

    pub fn state(&self) -> WidgetState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == WidgetState::Open
    }

    pub fn is_gdpr_locked(&self) -> bool {
        self.gdpr_locked
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn should_start_minimized(&self) -> bool {
        self.flags
            .should_start_minimized(self.config.widget.start_minimized_after_interaction)
    }

    /// Every failure ends as a diagnostic bot message; nothing propagates.
    pub fn send_message(&mut self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::with_status(SendStatus::Ignored);
        }
        if self.gdpr_locked {
            return SendOutcome::with_status(SendStatus::ConsentRequired);
        }

        self.cancel_stream();
        self.action_errors.borrow_mut().clear();

        self.history.push(Message::user(text));
        self.view.append_message(Role::User, &escape_html(text));
        self.persist();
        self.flags.mark_interacted();
        self.view.clear_input();
        self.view.set_typing_indicator(true);
        self.view.scroll_to_bottom();

        let bubble_before = self.last_bot_bubble;
        let mut outcome = SendOutcome::with_status(SendStatus::Replied);
        match self.exchange(text, &mut outcome) {
            Ok(()) => {
                self.observer.record_exchange(
                    &self.session_id,
                    if outcome.cancelled { "cancelled" } else { "replied" },
                    json!({
                        "chars": outcome.reply.as_deref().map(|r| r.chars().count()),
                        "streamed": outcome.streamed,
                        "actions": outcome.actions.len(),
                        "redirect": outcome.redirected_to,
                    }),
                );
            }
            Err(err) => {
                self.view.set_typing_indicator(false);
                let diagnostic = ErrorHandler::new()
                    .webhook_url(self.transport.endpoint())
                    .handle(&err)
                    .at(self.now_utc());
                let formatted = diagnostic.format();
                let html = render_markdown(&formatted);
                // A stream that failed or carried no text leaves its bubble behind.
                let fresh_bubble = self
                    .last_bot_bubble
                    .filter(|bubble| Some(*bubble) != bubble_before);
                match fresh_bubble {
                    Some(bubble) => {
                        self.view.set_typing_cursor(bubble, false);
                        self.view.update_message(bubble, &html);
                    }
                    None => {
                        self.view.append_message(Role::Assistant, &html);
                    }
                }
                self.history.push(Message::assistant(formatted));
                self.persist();
                self.view.set_inputs_enabled(true);
                self.view.scroll_to_bottom();
                self.observer.record_exchange(
                    &self.session_id,
                    "failed",
                    json!({ "kind": diagnostic.kind, "detail": diagnostic.detail }),
                );
                outcome.status = SendStatus::Failed;
                outcome.diagnostic = Some(diagnostic);
            }
        }
        outcome.action_errors = self.action_errors.borrow().clone();
        outcome
    }

    fn exchange(&mut self, text: &str, outcome: &mut SendOutcome) -> Result<()> {
        let url = self.transport.endpoint().ok_or(ChatError::Configuration)?;
        let payload = ChatPayload {
            chat_input: text.to_string(),
            session_id: self.session_id.clone(),
        };
        self.observer
            .verbose_log(&format!("POST {url} (session {})", self.session_id));

        let reply = match self.transport.post(&payload)? {
            WebhookReply::Stream(mut reader) => {
                self.view.set_typing_indicator(false);
                let bubble = self.view.append_message(Role::Assistant, "");
                self.last_bot_bubble = Some(bubble);
                let streamed = self
                    .renderer
                    .reveal_stream(&mut reader, self.view.as_mut(), bubble)
                    .map_err(|err| ChatError::Transport {
                        url: url.clone(),
                        detail: err.to_string(),
                    })?;
                let cancelled = streamed.was_cancelled();
                let recognized = streamed.parsed_lines + streamed.control_lines;
                if streamed.text.is_empty()
                    && !cancelled
                    && recognized > 0
                    && streamed.directives.is_none()
                {
                    return Err(
                        ChatError::Format("stream carried no message text".to_string()).into(),
                    );
                }
                let parsed = if streamed.text.is_empty() && !cancelled && recognized == 0 {
                    let parsed = with_nested_directives(extract_reply(&streamed.raw_body)?);
                    self.present_buffered(&parsed.message, bubble);
                    parsed
                } else {
                    let mut envelope = ParsedResponse::plain(streamed.text.clone());
                    envelope.is_structured = true;
                    if let Some(directives) = &streamed.directives {
                        copy_directives(&mut envelope, directives);
                    }
                    let parsed = with_nested_directives(envelope);
                    if !cancelled && parsed.message != streamed.text {
                        self.view
                            .update_message(bubble, &render_markdown(&parsed.message));
                    }
                    parsed
                };
                Reply {
                    parsed,
                    bubble,
                    streamed: true,
                    cancelled,
                }
            }
            WebhookReply::Body(body) => {
                let parsed = with_nested_directives(extract_reply(&body)?);
                self.view.set_typing_indicator(false);
                let bubble = self.view.append_message(Role::Assistant, "");
                self.last_bot_bubble = Some(bubble);
                let cancelled = self.present_buffered(&parsed.message, bubble);
                Reply {
                    parsed,
                    bubble,
                    streamed: false,
                    cancelled,
                }
            }
        };

        self.history.push(Message::assistant(reply.parsed.message.clone()));
        self.persist();
        outcome.reply = Some(reply.parsed.message.clone());
        outcome.streamed = reply.streamed;
        outcome.cancelled = reply.cancelled;
        if reply.cancelled {
            return Ok(());
        }

        let parsed = &reply.parsed;
        if parsed.has_action
            && let Some(action) = parsed.action_type.as_deref()
        {
            let dispatched =
                self.dispatcher
                    .execute(self.host.as_mut(), action, parsed.action_data.as_ref());
            let close = dispatched.close_requested;
            outcome.actions.push(dispatched);
            if close {
                self.close();
            }
        }

        if parsed.has_redirect
            && let Some(target) = parsed.redirect_url.as_deref()
        {
            let bubble_html = render_markdown(&parsed.message);
            let navigated = self.redirects.execute_redirect(
                &RedirectRequest {
                    url: target,
                    delay_ms: parsed.redirect_delay_ms,
                    history: &self.history,
                    session_id: &self.session_id,
                },
                RedirectContext {
                    view: self.view.as_mut(),
                    host: self.host.as_mut(),
                    bubble: Some((reply.bubble, bubble_html)),
                },
            )?;
            outcome.redirected_to = Some(navigated);
        }
        Ok(())
    }

    /// Returns `true` when the reveal was cancelled.
    fn present_buffered(&mut self, message: &str, bubble: MessageHandle) -> bool {
        match self.presentation.buffered_reveal() {
            BufferedReveal::Words => {
                let shown = self
                    .renderer
                    .reveal_words(message, self.view.as_mut(), bubble);
                shown.state == wland_render::RevealState::Cancelled
            }
            BufferedReveal::Instant => {
                self.view.update_message(bubble, &render_markdown(message));
                self.view.scroll_to_bottom();
                self.view.set_inputs_enabled(true);
                false
            }
        }
    }

    fn persist(&self) {
        self.conversation
            .save(&self.history, &self.session_id, &self.host.current_url());
    }

    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.now_ms()).unwrap_or_else(Utc::now)
    }
}

/// A bot message may itself be a JSON envelope; its fields win over the
/// transport-level ones.
fn with_nested_directives(outer: ParsedResponse) -> ParsedResponse {
    let inner = parse_response(&outer.message);
    if !inner.is_structured {
        return outer;
    }
    let mut merged = outer;
    merged.message = inner.message.clone();
    copy_directives(&mut merged, &inner);
    merged
}

fn copy_directives(target: &mut ParsedResponse, source: &ParsedResponse) {
    if source.has_redirect {
        target.has_redirect = true;
        target.redirect_url = source.redirect_url.clone();
        target.redirect_delay_ms = source.redirect_delay_ms;
    }
    if source.has_action {
        target.has_action = true;
        target.action_type = source.action_type.clone();
        target.action_data = source.action_data.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_envelope_overrides_outer_directives() {
        let mut outer = ParsedResponse::plain(
            r#"{"message":"Listo","action":"close_chat"}"#.to_string(),
        );
        outer.is_structured = true;
        outer.has_redirect = true;
        outer.redirect_url = Some("/outer".to_string());

        let merged = with_nested_directives(outer);
        assert_eq!(merged.message, "Listo");
        assert_eq!(merged.redirect_url.as_deref(), Some("/outer"));
        assert_eq!(merged.action_type.as_deref(), Some("close_chat"));
    }

    #[test]
    fn plain_bot_message_is_untouched() {
        let outer = ParsedResponse::plain("Hola");
        assert_eq!(with_nested_directives(outer.clone()), outer);
    }

    #[test]
    fn directives_copy_only_what_is_present() {
        let mut target = ParsedResponse::plain("x");
        let mut source = ParsedResponse::plain("");
        source.has_action = true;
        source.action_type = Some("trigger_event".to_string());
        source.action_data = Some(json!({"event_name": "e"}));
        copy_directives(&mut target, &source);
        assert!(target.has_action);
        assert!(!target.has_redirect);
        assert_eq!(target.message, "x");
    }
}
