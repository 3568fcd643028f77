//! Test doubles for the widget ports plus a scripted webhook server.

use anyhow::{Result, anyhow};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use wland_core::{
    ChatView, Clock, ConsentNotice, HostPage, Layout, MessageHandle, PopupRequest, Role,
    ScrollBehavior, SessionIdProvider, StreamHandle,
};

mod server;

pub use server::{MockResponse, MockWebhook, RecordedRequest};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewMessage {
    pub role: Role,
    pub html: String,
    pub cursor: bool,
    pub updates: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub open: bool,
    pub layout: Option<Layout>,
    pub consent: Option<ConsentNotice>,
    pub messages: Vec<ViewMessage>,
    pub typing_indicator: bool,
    pub inputs_enabled: bool,
    /// Every `set_inputs_enabled` call, in order.
    pub input_toggles: Vec<bool>,
    pub input_clears: usize,
    pub focus_count: usize,
    pub scroll_count: usize,
}

impl ViewState {
    pub fn last_message(&self) -> Option<&ViewMessage> {
        self.messages.last()
    }
}

/// [`ChatView`] that records everything; clones share state.
#[derive(Debug, Clone)]
pub struct RecordingView {
    state: Arc<Mutex<ViewState>>,
}

impl Default for RecordingView {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ViewState {
                inputs_enabled: true,
                ..ViewState::default()
            })),
        }
    }

    pub fn state(&self) -> ViewState {
        lock(&self.state).clone()
    }
}

impl ChatView for RecordingView {
    fn show_widget(&mut self, layout: Layout) {
        let mut state = lock(&self.state);
        state.open = true;
        state.layout = Some(layout);
    }

    fn hide_widget(&mut self) {
        lock(&self.state).open = false;
    }

    fn show_consent(&mut self, notice: &ConsentNotice) {
        lock(&self.state).consent = Some(notice.clone());
    }

    fn hide_consent(&mut self) {
        lock(&self.state).consent = None;
    }

    fn append_message(&mut self, role: Role, html: &str) -> MessageHandle {
        let mut state = lock(&self.state);
        state.messages.push(ViewMessage {
            role,
            html: html.to_string(),
            cursor: false,
            updates: 0,
        });
        state.messages.len() - 1
    }

    fn update_message(&mut self, handle: MessageHandle, html: &str) {
        if let Some(message) = lock(&self.state).messages.get_mut(handle) {
            message.html = html.to_string();
            message.updates += 1;
        }
    }

    fn set_typing_cursor(&mut self, handle: MessageHandle, visible: bool) {
        if let Some(message) = lock(&self.state).messages.get_mut(handle) {
            message.cursor = visible;
        }
    }

    fn set_typing_indicator(&mut self, visible: bool) {
        lock(&self.state).typing_indicator = visible;
    }

    fn set_inputs_enabled(&mut self, enabled: bool) {
        let mut state = lock(&self.state);
        state.inputs_enabled = enabled;
        state.input_toggles.push(enabled);
    }

    fn clear_input(&mut self) {
        lock(&self.state).input_clears += 1;
    }

    fn focus_input(&mut self) {
        lock(&self.state).focus_count += 1;
    }

    fn scroll_to_bottom(&mut self) {
        lock(&self.state).scroll_count += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostState {
    pub url: String,
    pub popups: Vec<PopupRequest>,
    pub events: Vec<(String, Value)>,
    pub reloads: usize,
    pub scrolls: Vec<(String, ScrollBehavior)>,
    /// Navigated URL and the clock time it happened at.
    pub navigations: Vec<(String, i64)>,
    pub selectors: Vec<String>,
    pub fail_popups: bool,
}

/// [`HostPage`] that records side effects instead of performing them.
#[derive(Clone)]
pub struct RecordingHost {
    state: Arc<Mutex<HostState>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RecordingHost {
    pub fn new(url: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                url: url.to_string(),
                ..HostState::default()
            })),
            clock: None,
        }
    }

    /// Stamp navigations with this clock's time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Selectors that `scroll_into_view` will find.
    pub fn with_selectors(self, selectors: &[&str]) -> Self {
        lock(&self.state).selectors = selectors.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Makes `open_window` fail, as a blocked popup would.
    pub fn failing_popups(self) -> Self {
        lock(&self.state).fail_popups = true;
        self
    }

    pub fn state(&self) -> HostState {
        lock(&self.state).clone()
    }
}

impl HostPage for RecordingHost {
    fn current_url(&self) -> String {
        lock(&self.state).url.clone()
    }

    fn screen_size(&self) -> (u32, u32) {
        (1920, 1080)
    }

    fn open_window(&mut self, request: &PopupRequest) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_popups {
            return Err(anyhow!("popup blocked"));
        }
        state.popups.push(request.clone());
        Ok(())
    }

    fn dispatch_event(&mut self, name: &str, detail: &Value) -> Result<()> {
        lock(&self.state)
            .events
            .push((name.to_string(), detail.clone()));
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        lock(&self.state).reloads += 1;
        Ok(())
    }

    fn scroll_into_view(&mut self, selector: &str, behavior: ScrollBehavior) -> Result<bool> {
        let mut state = lock(&self.state);
        if !state.selectors.iter().any(|s| s == selector) {
            return Ok(false);
        }
        state.scrolls.push((selector.to_string(), behavior));
        Ok(true)
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        let at = self.clock.as_ref().map(|c| c.now_ms()).unwrap_or_default();
        let mut state = lock(&self.state);
        state.navigations.push((url.to_string(), at));
        state.url = url.to_string();
        Ok(())
    }
}

/// Clock whose sleeps return immediately and advance virtual time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<i64>,
    sleeps: Mutex<Vec<Duration>>,
    cancel_after: Mutex<Option<(usize, StreamHandle)>>,
}

impl ManualClock {
    pub fn starting_at(now_ms: i64) -> Self {
        Self {
            now: Mutex::new(now_ms),
            ..Self::default()
        }
    }

    /// Cancels `handle` once the `count`-th sleep has been recorded.
    pub fn cancel_after(&self, count: usize, handle: StreamHandle) {
        *lock(&self.cancel_after) = Some((count, handle));
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }

    pub fn total_slept(&self) -> Duration {
        lock(&self.sleeps).iter().sum()
    }

    pub fn clear_sleeps(&self) {
        lock(&self.sleeps).clear();
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        *lock(&self.now)
    }

    fn sleep(&self, duration: Duration) {
        *lock(&self.now) += duration.as_millis() as i64;
        let count = {
            let mut sleeps = lock(&self.sleeps);
            sleeps.push(duration);
            sleeps.len()
        };
        if let Some((target, handle)) = lock(&self.cancel_after).as_ref()
            && count == *target
        {
            handle.cancel();
        }
    }
}

/// Fingerprint source that tests can switch on later.
#[derive(Debug, Clone, Default)]
pub struct FixedSessionIds {
    fingerprint: Arc<Mutex<Option<String>>>,
}

impl FixedSessionIds {
    pub fn new(fingerprint: Option<&str>) -> Self {
        Self {
            fingerprint: Arc::new(Mutex::new(fingerprint.map(ToString::to_string))),
        }
    }

    pub fn set(&self, fingerprint: Option<&str>) {
        *lock(&self.fingerprint) = fingerprint.map(ToString::to_string);
    }
}

impl SessionIdProvider for FixedSessionIds {
    fn fingerprint(&self) -> Option<String> {
        lock(&self.fingerprint).clone()
    }
}
