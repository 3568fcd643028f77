//! Chat session controller for the webhook widget.
//!
//! [`ChatController`] owns the conversation and wires the webhook client,
//! the reveal renderer, the action dispatcher and the state store together.
//! Host integration happens through the ports in [`ChatPorts`].

mod controller;
mod presentation;
mod session;

pub use controller::{ChatController, ChatPorts, SendOutcome, SendStatus, WidgetState};
pub use presentation::{
    BufferedReveal, FullscreenPresentation, ModalPresentation, Presentation, presentation_for,
};
pub use session::{is_temporary, resolve_session_id, temporary_session_id};
