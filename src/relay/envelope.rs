//! The message unit passed between the forum and chat workers.

/// Body used when an envelope is built from a title alone.
pub const DEFAULT_BODY: &str = " ";

/// A cross-platform message: a title and a body.
///
/// Envelopes carry no identity beyond their field values. They are created at
/// relay time, consumed at most once by the opposite worker, then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Envelope {
    title: String,
    body: String,
}

impl Envelope {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Build an envelope with only a title; the body is a single space.
    pub fn titled(title: impl Into<String>) -> Self {
        Self::new(title, DEFAULT_BODY)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titled_envelope_has_single_space_body() {
        let env = Envelope::titled("Raid tonight");
        assert_eq!(env.title(), "Raid tonight");
        assert_eq!(env.body(), " ");
    }

    #[test]
    fn empty_title_is_allowed() {
        let env = Envelope::new("", "status only");
        assert!(env.title().is_empty());
        assert_eq!(env.body(), "status only");
    }

    #[test]
    fn equality_is_by_value() {
        assert_eq!(Envelope::new("T", "B"), Envelope::new("T", "B"));
        assert_ne!(Envelope::new("T", "B"), Envelope::new("T", "b"));
    }
}
