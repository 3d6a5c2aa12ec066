/// Text of the assistant reply being built during one turn.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplyAccumulator {
    text: String,
}

impl ReplyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Somewhere the partial reply is shown while it streams in.
///
/// `render` always receives the full text so far. Rendering the same text
/// twice must leave the display unchanged.
pub trait ReplySurface {
    fn render(&mut self, text: &str);
}
