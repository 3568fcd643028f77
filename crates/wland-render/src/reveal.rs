use rand::Rng;
use serde_json::Value;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use wland_core::{ChatView, Clock, MessageHandle, ParsedResponse, StreamHandle, TypingConfig};
use wland_observe::Observer;
use wland_webhook::{StreamLine, apply_directives, decode_stream_line, has_directive_fields};

use crate::markdown::{escape_html, render_markdown};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealState {
    Idle,
    Reading,
    Revealing,
    Done,
    Cancelled,
}

/// Buffers for one in-flight streamed reply.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    /// Partial line carried over to the next read.
    pub raw_buffer: String,
    pub full_content: String,
    pub visible_content: String,
    pending_bytes: Vec<u8>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `bytes` as forms complete UTF-8; an incomplete
    /// trailing sequence waits for the next chunk. Invalid bytes become U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending_bytes.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending_bytes.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match err.error_len() {
                        None => {
                            self.pending_bytes.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }

    /// Appends decoded text and returns every newline-terminated line.
    pub fn push_text(&mut self, text: &str) -> Vec<String> {
        self.raw_buffer.push_str(text);
        let mut lines = Vec::new();
        while let Some(pos) = self.raw_buffer.find('\n') {
            lines.push(self.raw_buffer[..pos].to_string());
            self.raw_buffer.drain(..=pos);
        }
        lines
    }

    /// Whatever is left once the body ends, including undecodable bytes.
    pub fn take_remainder(&mut self) -> String {
        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).to_string();
            self.pending_bytes.clear();
            self.raw_buffer.push_str(&tail);
        }
        std::mem::take(&mut self.raw_buffer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    /// All extracted text, revealed or not.
    pub text: String,
    /// Redirect/action fields from the last line that carried any.
    pub directives: Option<ParsedResponse>,
    /// Everything read, for the buffered fallback when no line had text.
    pub raw_body: String,
    pub parsed_lines: usize,
    /// `begin`/`end`/`metadata` and `[DONE]` lines.
    pub control_lines: usize,
    pub state: RevealState,
}

impl StreamOutcome {
    pub fn was_cancelled(&self) -> bool {
        self.state == RevealState::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordsOutcome {
    pub visible: String,
    pub state: RevealState,
}

/// Paced reveal of replies into a message bubble.
#[derive(Clone)]
pub struct StreamRenderer {
    typing: TypingConfig,
    clock: Arc<dyn Clock>,
    stream: StreamHandle,
    observer: Observer,
}

impl StreamRenderer {
    pub fn new(
        typing: TypingConfig,
        clock: Arc<dyn Clock>,
        stream: StreamHandle,
        observer: Observer,
    ) -> Self {
        Self {
            typing,
            clock,
            stream,
            observer,
        }
    }

    pub fn stream_handle(&self) -> StreamHandle {
        self.stream.clone()
    }

    /// Delay after revealing `ch`.
    pub fn char_delay(&self, ch: char) -> Duration {
        let (low, high) = ordered(self.typing.jitter_min, self.typing.jitter_max);
        let factor = if (high - low).abs() < f64::EPSILON {
            low
        } else {
            rand::thread_rng().gen_range(low..=high)
        };
        let mut millis = (self.typing.char_delay_ms as f64 * factor).round().max(0.0) as u64;
        millis += match ch {
            '.' | '!' | '?' | '\n' => self.typing.sentence_pause_ms,
            ',' | ';' | ':' => self.typing.clause_pause_ms,
            _ => 0,
        };
        Duration::from_millis(millis)
    }

    pub fn word_delay(&self) -> Duration {
        Duration::from_millis(60_000 / u64::from(self.typing.words_per_minute.max(1)))
    }

    /// Reads `reader` to the end, revealing every text-bearing line character
    /// by character. Inputs are re-enabled on every exit path and the typing
    /// cursor stays on the bubble unless the reveal was cancelled.
    pub fn reveal_stream(
        &self,
        reader: &mut dyn Read,
        view: &mut dyn ChatView,
        bubble: MessageHandle,
    ) -> io::Result<StreamOutcome> {
        self.stream.begin();
        view.set_inputs_enabled(false);
        view.set_typing_cursor(bubble, true);
        let result = self.read_and_reveal(reader, view, bubble);
        if matches!(&result, Ok(outcome) if outcome.was_cancelled()) {
            view.set_typing_cursor(bubble, false);
        }
        self.stream.finish();
        view.set_inputs_enabled(true);
        result
    }

    fn read_and_reveal(
        &self,
        reader: &mut dyn Read,
        view: &mut dyn ChatView,
        bubble: MessageHandle,
    ) -> io::Result<StreamOutcome> {
        let mut acc = StreamAccumulator::new();
        let mut outcome = StreamOutcome {
            text: String::new(),
            directives: None,
            raw_body: String::new(),
            parsed_lines: 0,
            control_lines: 0,
            state: RevealState::Reading,
        };
        let mut chunk = [0_u8; READ_CHUNK];

        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            let text = acc.decode(&chunk[..read]);
            outcome.raw_body.push_str(&text);
            for line in acc.push_text(&text) {
                if !self.handle_line(&line, &mut acc, &mut outcome, view, bubble) {
                    outcome.state = RevealState::Cancelled;
                    return Ok(outcome);
                }
            }
        }

        let remainder = acc.take_remainder();
        if !remainder.is_empty() {
            if !outcome.raw_body.ends_with(&remainder) {
                outcome.raw_body.push_str(&remainder);
            }
            if !self.handle_line(&remainder, &mut acc, &mut outcome, view, bubble) {
                outcome.state = RevealState::Cancelled;
                return Ok(outcome);
            }
        }

        if !acc.full_content.is_empty() {
            view.update_message(bubble, &render_markdown(&acc.full_content));
        }
        outcome.text = acc.full_content;
        outcome.state = RevealState::Done;
        self.observer.verbose_log(&format!(
            "stream finished: {} lines, {} chars",
            outcome.parsed_lines,
            outcome.text.chars().count()
        ));
        Ok(outcome)
    }

    /// Returns `false` once the reveal has been cancelled.
    fn handle_line(
        &self,
        line: &str,
        acc: &mut StreamAccumulator,
        outcome: &mut StreamOutcome,
        view: &mut dyn ChatView,
        bubble: MessageHandle,
    ) -> bool {
        let (text, value) = match decode_stream_line(line) {
            StreamLine::Empty => return true,
            StreamLine::Control(_) => {
                outcome.control_lines += 1;
                return true;
            }
            StreamLine::Unparsed => {
                self.observer
                    .verbose_log(&format!("dropping unparsable stream line ({} bytes)", line.len()));
                return true;
            }
            StreamLine::Other(value) => (None, value),
            StreamLine::Content { text, value } => (Some(text), value),
        };
        outcome.parsed_lines += 1;
        record_directives(outcome, &value);

        let Some(text) = text else {
            return true;
        };
        acc.full_content.push_str(&text);
        outcome.text = acc.full_content.clone();
        outcome.state = RevealState::Revealing;
        for ch in text.chars() {
            if !self.stream.is_active() {
                return false;
            }
            acc.visible_content.push(ch);
            view.update_message(bubble, &render_markdown(&acc.visible_content));
            view.scroll_to_bottom();
            self.clock.sleep(self.char_delay(ch));
        }
        true
    }

    /// Word-paced reveal of an already complete reply, as escaped plain text.
    /// Markdown is applied once at the end if nothing cancelled the reveal.
    pub fn reveal_words(
        &self,
        text: &str,
        view: &mut dyn ChatView,
        bubble: MessageHandle,
    ) -> WordsOutcome {
        self.stream.begin();
        view.set_inputs_enabled(false);
        view.set_typing_cursor(bubble, true);

        let delay = self.word_delay();
        let mut visible = String::new();
        let mut state = RevealState::Revealing;
        for token in word_tokens(text) {
            if !self.stream.is_active() {
                state = RevealState::Cancelled;
                break;
            }
            visible.push_str(token);
            view.update_message(bubble, &escape_html(&visible));
            view.scroll_to_bottom();
            self.clock.sleep(delay);
        }

        if state == RevealState::Cancelled {
            view.set_typing_cursor(bubble, false);
        } else {
            view.update_message(bubble, &render_markdown(text));
            state = RevealState::Done;
        }
        self.stream.finish();
        view.set_inputs_enabled(true);
        WordsOutcome { visible, state }
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b { (a, b) } else { (b, a) }
}

fn record_directives(outcome: &mut StreamOutcome, value: &Value) {
    if !has_directive_fields(value) {
        return;
    }
    let mut parsed = ParsedResponse::plain(String::new());
    apply_directives(&mut parsed, value);
    outcome.directives = Some(parsed);
}

/// Splits into word-plus-trailing-whitespace tokens; leading whitespace
/// stays with the first token.
pub fn word_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut seen_word = false;
    let mut in_space = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_space = true;
        } else {
            if in_space && seen_word {
                tokens.push(&text[start..idx]);
                start = idx;
            }
            in_space = false;
            seen_word = true;
        }
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}
