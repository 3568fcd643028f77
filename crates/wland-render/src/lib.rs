//! Incremental display of bot replies.

mod markdown;
mod reveal;

pub use markdown::{escape_html, render_markdown};
pub use reveal::{
    RevealState, StreamAccumulator, StreamOutcome, StreamRenderer, WordsOutcome, word_tokens,
};
