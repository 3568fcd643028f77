use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use wland_core::{
    ChatView, ConsentNotice, HostPage, Layout, MessageHandle, PopupRequest, Role, ScrollBehavior,
    SessionIdProvider,
};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const ITALIC: &str = "\x1b[3m";
const UNDERLINE: &str = "\x1b[4m";
const CYAN: &str = "\x1b[36m";
const GRAY: &str = "\x1b[90m";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Converts the widget's sanitized message HTML into terminal text.
///
/// Only the markup produced by the markdown renderer is understood; any
/// other tag is dropped and its text kept.
pub fn html_to_terminal(html: &str, ansi: bool) -> String {
    let mut out = String::with_capacity(html.len());
    let mut href: Option<String> = None;
    let mut rest = html;

    while let Some(start) = rest.find(['<', '&']) {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        if rest.starts_with('&') {
            let (ch, len) = decode_entity(rest);
            out.push(ch);
            rest = &rest[len..];
            continue;
        }

        let Some(end) = rest.find('>') else {
            out.push_str(rest);
            return out;
        };
        let tag = &rest[1..end];
        rest = &rest[end + 1..];

        let name = tag
            .trim_start_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let closing = tag.starts_with('/');
        match (name.as_str(), closing) {
            ("br", _) => out.push('\n'),
            ("strong", false) if ansi => out.push_str(BOLD),
            ("em", false) if ansi => out.push_str(ITALIC),
            ("strong" | "em", true) if ansi => out.push_str(RESET),
            ("a", false) => {
                href = attribute(tag, "href");
                if ansi {
                    out.push_str(UNDERLINE);
                    out.push_str(CYAN);
                }
            }
            ("a", true) => {
                if ansi {
                    out.push_str(RESET);
                }
                if let Some(target) = href.take().filter(|target| target != "#") {
                    if ansi {
                        out.push_str(&format!(" {GRAY}({target}){RESET}"));
                    } else {
                        out.push_str(&format!(" ({target})"));
                    }
                }
            }
            ("div", false) => {
                out.push('\n');
                if ansi {
                    out.push_str(DIM);
                }
            }
            ("div", true) if ansi => out.push_str(RESET),
            _ => {}
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(raw: &str) -> (char, usize) {
    const ENTITIES: [(&str, char); 5] = [
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&#039;", '\''),
    ];
    ENTITIES
        .iter()
        .find(|(entity, _)| raw.starts_with(entity))
        .map(|(entity, ch)| (*ch, entity.len()))
        .unwrap_or(('&', 1))
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let len = tag[start..].find('"')?;
    let mut value = String::new();
    let mut rest = &tag[start..start + len];
    while let Some(pos) = rest.find('&') {
        value.push_str(&rest[..pos]);
        let (ch, consumed) = decode_entity(&rest[pos..]);
        value.push(ch);
        rest = &rest[pos + consumed..];
    }
    value.push_str(rest);
    Some(value)
}

fn role_prefix(role: Role, ansi: bool) -> String {
    let label = match role {
        Role::User => "you",
        Role::Assistant => "bot",
    };
    if ansi {
        format!("{BOLD}{CYAN}{label}>{RESET} ")
    } else {
        format!("{label}> ")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Default)]
struct TerminalMessage {
    role: Option<Role>,
    html: String,
    /// Plain text already on screen; `None` until first printed.
    shown: Option<String>,
    live: bool,
}

#[derive(Debug, Default)]
struct ViewInner {
    messages: Vec<TerminalMessage>,
}

/// [`ChatView`] that prints to stdout.
///
/// Streaming bubbles are printed as they grow. Everything else is printed
/// once the exchange settles, which is when the pipeline re-enables input.
/// A quiet view only records the transcript.
#[derive(Clone)]
pub struct TerminalView {
    inner: Arc<Mutex<ViewInner>>,
    quiet: bool,
    ansi: bool,
}

impl TerminalView {
    pub fn new(quiet: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ViewInner::default())),
            quiet,
            ansi: !quiet && std::io::stdout().is_terminal(),
        }
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        lock(&self.inner)
            .messages
            .iter()
            .filter_map(|message| {
                Some(TranscriptEntry {
                    role: message.role?,
                    html: message.html.clone(),
                    text: html_to_terminal(&message.html, false),
                })
            })
            .collect()
    }

    fn emit(&self, text: &str) {
        if self.quiet {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn print_whole(&self, message: &mut TerminalMessage) {
        let Some(role) = message.role else {
            return;
        };
        let plain = html_to_terminal(&message.html, false);
        let styled = html_to_terminal(&message.html, self.ansi);
        self.emit(&format!("{}{styled}\n", role_prefix(role, self.ansi)));
        message.shown = Some(plain);
    }

    /// Prints every finished message up to `limit` that is not on screen yet.
    fn settle(&self, inner: &mut ViewInner, limit: usize) {
        for message in inner.messages.iter_mut().take(limit) {
            if message.shown.is_none() && !message.html.is_empty() {
                self.print_whole(message);
            }
        }
    }
}

impl ChatView for TerminalView {
    fn show_widget(&mut self, layout: Layout) {
        let label = match layout {
            Layout::Modal => "modal",
            Layout::Fullscreen => "fullscreen",
        };
        if self.ansi {
            self.emit(&format!("{DIM}chat opened ({label}){RESET}\n"));
        }
    }

    fn hide_widget(&mut self) {
        if self.ansi {
            self.emit(&format!("{DIM}chat closed{RESET}\n"));
        }
    }

    fn show_consent(&mut self, notice: &ConsentNotice) {
        self.emit(&format!(
            "{}\n{}\n[{}] / [{}]\n",
            notice.title, notice.message, notice.accept_label, notice.decline_label
        ));
    }

    fn hide_consent(&mut self) {}

    fn append_message(&mut self, role: Role, html: &str) -> MessageHandle {
        let mut inner = lock(&self.inner);
        inner.messages.push(TerminalMessage {
            role: Some(role),
            html: html.to_string(),
            ..TerminalMessage::default()
        });
        inner.messages.len() - 1
    }

    fn update_message(&mut self, handle: MessageHandle, html: &str) {
        let mut inner = lock(&self.inner);
        let Some(message) = inner.messages.get_mut(handle) else {
            return;
        };
        message.html = html.to_string();
        let Some(shown) = message.shown.as_ref() else {
            return;
        };
        let plain = html_to_terminal(html, false);
        if let Some(delta) = plain.strip_prefix(shown.as_str()) {
            if !delta.is_empty() {
                let delta = if message.live {
                    delta.to_string()
                } else {
                    html_to_terminal(html, self.ansi)
                        .lines()
                        .last()
                        .unwrap_or(delta)
                        .to_string()
                        + "\n"
                };
                self.emit(&delta);
            }
        }
        // Formatting-only rewrites (the final markdown pass) stay silent.
        message.shown = Some(plain);
    }

    fn set_typing_cursor(&mut self, handle: MessageHandle, visible: bool) {
        let mut inner = lock(&self.inner);
        if visible {
            self.settle(&mut inner, handle);
        }
        let Some(message) = inner.messages.get_mut(handle) else {
            return;
        };
        if visible && !message.live {
            message.live = true;
            if message.shown.is_none() {
                let role = message.role.unwrap_or(Role::Assistant);
                let plain = html_to_terminal(&message.html, false);
                self.emit(&format!("{}{plain}", role_prefix(role, self.ansi)));
                message.shown = Some(plain);
            }
        } else if !visible && message.live {
            message.live = false;
            self.emit("\n");
        }
    }

    fn set_typing_indicator(&mut self, visible: bool) {
        if visible && self.ansi {
            self.emit(&format!("{DIM}...{RESET}\r"));
        }
    }

    fn set_inputs_enabled(&mut self, enabled: bool) {
        if enabled {
            let mut inner = lock(&self.inner);
            let limit = inner.messages.len();
            self.settle(&mut inner, limit);
        }
    }

    fn clear_input(&mut self) {}

    fn focus_input(&mut self) {}

    fn scroll_to_bottom(&mut self) {}
}

/// A side effect the pipeline asked the host page to perform.
#[derive(Debug, Clone, Serialize)]
pub struct HostEffect {
    pub kind: String,
    pub target: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

/// [`HostPage`] without a browser: effects are reported on stderr and
/// recorded for the JSON output.
#[derive(Clone)]
pub struct TerminalHost {
    page_url: Arc<Mutex<String>>,
    effects: Arc<Mutex<Vec<HostEffect>>>,
    quiet: bool,
}

impl TerminalHost {
    pub fn new(page_url: &str, quiet: bool) -> Self {
        Self {
            page_url: Arc::new(Mutex::new(page_url.to_string())),
            effects: Arc::new(Mutex::new(Vec::new())),
            quiet,
        }
    }

    pub fn effects(&self) -> Vec<HostEffect> {
        lock(&self.effects).clone()
    }

    fn record(&self, kind: &str, target: &str, detail: Value) {
        if !self.quiet {
            if detail.is_null() {
                eprintln!("[page] {kind} {target}");
            } else {
                eprintln!("[page] {kind} {target} {detail}");
            }
        }
        lock(&self.effects).push(HostEffect {
            kind: kind.to_string(),
            target: target.to_string(),
            detail,
        });
    }
}

impl HostPage for TerminalHost {
    fn current_url(&self) -> String {
        lock(&self.page_url).clone()
    }

    fn screen_size(&self) -> (u32, u32) {
        (1920, 1080)
    }

    fn open_window(&mut self, request: &PopupRequest) -> Result<()> {
        self.record(
            "open_window",
            &request.url,
            serde_json::json!({
                "width": request.width,
                "height": request.height,
                "left": request.left,
                "top": request.top,
            }),
        );
        Ok(())
    }

    fn dispatch_event(&mut self, name: &str, detail: &Value) -> Result<()> {
        self.record("event", name, detail.clone());
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let url = self.current_url();
        self.record("reload", &url, Value::Null);
        Ok(())
    }

    fn scroll_into_view(&mut self, selector: &str, behavior: ScrollBehavior) -> Result<bool> {
        self.record(
            "scroll_to",
            selector,
            serde_json::json!({ "behavior": behavior.as_str() }),
        );
        Ok(false)
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.record("navigate", url, Value::Null);
        *lock(&self.page_url) = url.to_string();
        Ok(())
    }
}

/// Fingerprint passed on the command line, if any.
pub struct FlagSessionIds(pub Option<String>);

impl SessionIdProvider for FlagSessionIds {
    fn fingerprint(&self) -> Option<String> {
        self.0
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_markdown_markup_as_plain_text() {
        let html = "<strong>Hi</strong> &amp; <em>bye</em><br>line two";
        assert_eq!(html_to_terminal(html, false), "Hi & bye\nline two");
    }

    #[test]
    fn links_show_their_target() {
        let html = r#"<a href="https://a.test/?q=1&amp;r=2" target="_blank" rel="noopener noreferrer">docs</a>"#;
        assert_eq!(
            html_to_terminal(html, false),
            "docs (https://a.test/?q=1&r=2)"
        );
        let neutralized = r##"<a href="#" target="_blank" rel="noopener noreferrer">x</a>"##;
        assert_eq!(html_to_terminal(neutralized, false), "x");
    }

    #[test]
    fn ansi_mode_wraps_bold_text() {
        let out = html_to_terminal("<strong>x</strong>", true);
        assert_eq!(out, format!("{BOLD}x{RESET}"));
    }

    #[test]
    fn escaped_angle_brackets_are_not_tags() {
        assert_eq!(
            html_to_terminal("&lt;script&gt;alert(&#039;x&#039;)", false),
            "<script>alert('x')"
        );
        assert_eq!(html_to_terminal("a & b", false), "a & b");
    }

    #[test]
    fn redirect_notice_lands_on_its_own_line() {
        let html = r#"Bye<div class="wland-redirect-notice">Redirecting in 2 seconds...</div>"#;
        assert_eq!(
            html_to_terminal(html, false),
            "Bye\nRedirecting in 2 seconds..."
        );
    }

    #[test]
    fn quiet_view_keeps_transcript() {
        let mut view = TerminalView::new(true);
        let handle = view.append_message(Role::Assistant, "");
        view.set_typing_cursor(handle, true);
        view.update_message(handle, "Hel");
        view.update_message(handle, "<strong>Hello</strong>");
        view.set_typing_cursor(handle, false);
        let transcript = view.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].text, "Hello");
    }

    #[test]
    fn host_records_navigation_and_updates_url() {
        let mut host = TerminalHost::new("https://shop.test/", true);
        host.navigate("https://shop.test/thanks").expect("navigate");
        assert_eq!(host.current_url(), "https://shop.test/thanks");
        assert_eq!(host.effects()[0].kind, "navigate");
    }

    #[test]
    fn blank_flag_session_id_is_absent() {
        assert_eq!(FlagSessionIds(Some("  ".to_string())).fingerprint(), None);
        assert_eq!(
            FlagSessionIds(Some("fp_1".to_string())).fingerprint().as_deref(),
            Some("fp_1")
        );
    }
}
