//! Markdown subset to HTML that is safe to insert into the page.
//!
//! Escaping always runs first, so every tag in the output was produced here.

use regex::{Captures, Regex};
use std::sync::OnceLock;

const BLOCKED_SCHEMES: [&str; 3] = ["javascript:", "data:", "vbscript:"];

struct Rules {
    link: Regex,
    bold: Regex,
    italic: Regex,
}

fn rules() -> Option<&'static Rules> {
    static RULES: OnceLock<Option<Rules>> = OnceLock::new();
    RULES
        .get_or_init(|| {
            Some(Rules {
                link: Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").ok()?,
                bold: Regex::new(r"\*\*([^*\n]+?)\*\*").ok()?,
                italic: Regex::new(r"\*([^*\n]+?)\*").ok()?,
            })
        })
        .as_ref()
}

/// Escapes `& < > " '`.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

/// Links, then bold, then italic, then line breaks.
pub fn render_markdown(text: &str) -> String {
    let escaped = escape_html(text);
    let Some(rules) = rules() else {
        return escaped.replace('\n', "<br>");
    };
    let linked = rules.link.replace_all(&escaped, |caps: &Captures<'_>| {
        format!(
            r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
            safe_href(&caps[2]),
            &caps[1]
        )
    });
    let bold = rules.bold.replace_all(&linked, "<strong>$1</strong>");
    let italic = rules.italic.replace_all(&bold, "<em>$1</em>");
    italic.replace('\n', "<br>")
}

/// Script-capable URL schemes become `#`.
fn safe_href(url: &str) -> &str {
    let normalized: String = url
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .collect::<String>()
        .to_ascii_lowercase();
    if BLOCKED_SCHEMES
        .iter()
        .any(|scheme| normalized.starts_with(scheme))
    {
        "#"
    } else {
        url
    }
}
