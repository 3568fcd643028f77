use wland_core::{ChatView, Layout, PresentationKind};

/// How a reply that arrived in one piece is put on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferedReveal {
    /// Word-paced typing effect.
    Words,
    /// Rendered at once.
    Instant,
}

/// Visual behaviour that differs between the overlay and the fullscreen
/// widget. The message pipeline is the same for both.
pub trait Presentation {
    fn layout(&self) -> Layout;

    fn buffered_reveal(&self) -> BufferedReveal;

    fn open(&self, view: &mut dyn ChatView) {
        view.show_widget(self.layout());
    }

    fn close(&self, view: &mut dyn ChatView) {
        view.hide_widget();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModalPresentation;

impl Presentation for ModalPresentation {
    fn layout(&self) -> Layout {
        Layout::Modal
    }

    fn buffered_reveal(&self) -> BufferedReveal {
        BufferedReveal::Words
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FullscreenPresentation;

impl Presentation for FullscreenPresentation {
    fn layout(&self) -> Layout {
        Layout::Fullscreen
    }

    fn buffered_reveal(&self) -> BufferedReveal {
        BufferedReveal::Instant
    }

    fn open(&self, view: &mut dyn ChatView) {
        view.show_widget(Layout::Fullscreen);
        view.scroll_to_bottom();
    }
}

pub fn presentation_for(kind: PresentationKind) -> Box<dyn Presentation> {
    match kind {
        PresentationKind::Modal => Box::new(ModalPresentation),
        PresentationKind::Fullscreen => Box::new(FullscreenPresentation),
    }
}
