//! User-visible, non-blocking notices.

/// How a notice should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Something worked.
    Success,
    /// Something failed but the session carries on.
    Error,
}

/// A dismissible message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Presentation level.
    pub level: NoticeLevel,
    /// Short heading.
    pub title: String,
    /// Body text.
    pub description: String,
}

impl Notice {
    /// Creates a success notice.
    #[must_use]
    pub fn success(description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: "Success".to_string(),
            description: description.into(),
        }
    }

    /// Creates an error notice.
    #[must_use]
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: "Error".to_string(),
            description: description.into(),
        }
    }

    /// Returns `true` for [`NoticeLevel::Error`] notices.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }
}

/// Sink for notices. Implementations must not block.
pub trait Notifier: Send + Sync {
    /// Presents a notice to the user.
    fn notify(&self, notice: Notice);
}
