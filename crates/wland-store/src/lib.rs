//! Best-effort persistence of the conversation across a navigation boundary.
//!
//! Nothing here returns storage errors to callers: a failed read behaves like
//! an empty store and a failed write is logged and dropped.

use std::sync::Arc;
use wland_core::{
    CONVERSATION_STATE_KEY, Clock, ConversationSnapshot, GDPR_CONSENT_KEY, INTERACTED_KEY,
    KeyValueStore, Message, REDIRECT_PENDING_KEY,
};
use wland_observe::Observer;

mod backend;

pub use backend::{MemoryStore, Scope, SqliteStore};

const TRUE_SENTINEL: &str = "true";

/// Snapshot and redirect-flag access on the tab-scoped store.
#[derive(Clone)]
pub struct ConversationStore {
    tab: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    observer: Observer,
}

impl ConversationStore {
    pub fn new(tab: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, observer: Observer) -> Self {
        Self {
            tab,
            clock,
            observer,
        }
    }

    /// Overwrites any previous snapshot.
    pub fn save(&self, history: &[Message], session_id: &str, url: &str) {
        let snapshot = ConversationSnapshot {
            history: history.to_vec(),
            session_id: session_id.to_string(),
            timestamp: self.clock.now_ms(),
            url: url.to_string(),
        };
        let raw = match serde_json::to_string(&snapshot) {
            Ok(raw) => raw,
            Err(err) => {
                self.observer
                    .warn_log(&format!("could not serialize conversation state: {err}"));
                return;
            }
        };
        if let Err(err) = self.tab.set(CONVERSATION_STATE_KEY, &raw) {
            self.observer
                .warn_log(&format!("could not save conversation state: {err:#}"));
        }
    }

    /// Read-once: the entry is deleted whether or not it parses.
    pub fn restore(&self) -> Option<ConversationSnapshot> {
        let raw = match self.tab.get(CONVERSATION_STATE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                self.observer
                    .warn_log(&format!("could not read conversation state: {err:#}"));
                return None;
            }
        };
        if let Err(err) = self.tab.remove(CONVERSATION_STATE_KEY) {
            self.observer
                .warn_log(&format!("could not clear conversation state: {err:#}"));
        }
        match serde_json::from_str::<ConversationSnapshot>(&raw) {
            Ok(snapshot) => {
                self.observer.verbose_log(&format!(
                    "restored {} messages for session {}",
                    snapshot.history.len(),
                    snapshot.session_id
                ));
                Some(snapshot)
            }
            Err(err) => {
                self.observer
                    .warn_log(&format!("discarding corrupt conversation state: {err}"));
                None
            }
        }
    }

    pub fn mark_redirect_pending(&self) {
        if let Err(err) = self.tab.set(REDIRECT_PENDING_KEY, TRUE_SENTINEL) {
            self.observer
                .warn_log(&format!("could not set redirect flag: {err:#}"));
        }
    }

    /// True when this page load follows a redirect we triggered. Clears the flag.
    pub fn check_and_clear_redirect_pending(&self) -> bool {
        let pending = match self.tab.get(REDIRECT_PENDING_KEY) {
            Ok(value) => value.as_deref() == Some(TRUE_SENTINEL),
            Err(err) => {
                self.observer
                    .warn_log(&format!("could not read redirect flag: {err:#}"));
                return false;
            }
        };
        if pending && let Err(err) = self.tab.remove(REDIRECT_PENDING_KEY) {
            self.observer
                .warn_log(&format!("could not clear redirect flag: {err:#}"));
        }
        pending
    }
}

/// Long-lived visitor flags on the persistent store.
#[derive(Clone)]
pub struct InteractionFlags {
    persistent: Arc<dyn KeyValueStore>,
    observer: Observer,
}

impl InteractionFlags {
    pub fn new(persistent: Arc<dyn KeyValueStore>, observer: Observer) -> Self {
        Self {
            persistent,
            observer,
        }
    }

    pub fn mark_interacted(&self) {
        self.write_flag(INTERACTED_KEY);
    }

    pub fn has_interacted(&self) -> bool {
        self.read_flag(INTERACTED_KEY)
    }

    /// Returning visitors see the launcher collapsed.
    pub fn should_start_minimized(&self, enabled: bool) -> bool {
        enabled && self.has_interacted()
    }

    pub fn accept_consent(&self) {
        self.write_flag(GDPR_CONSENT_KEY);
    }

    pub fn has_consent(&self) -> bool {
        self.read_flag(GDPR_CONSENT_KEY)
    }

    fn read_flag(&self, key: &str) -> bool {
        match self.persistent.get(key) {
            Ok(value) => value.as_deref() == Some(TRUE_SENTINEL),
            Err(err) => {
                self.observer.warn_log(&format!("could not read {key}: {err:#}"));
                false
            }
        }
    }

    fn write_flag(&self, key: &str) {
        if let Err(err) = self.persistent.set(key, TRUE_SENTINEL) {
            self.observer.warn_log(&format!("could not write {key}: {err:#}"));
        }
    }
}
