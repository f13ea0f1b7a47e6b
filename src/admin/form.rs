use std::time::Duration;

use tokio::time::Instant;

use crate::{
    mutation::{MutationError, MutationOutcome},
    validate::FieldError,
};

/// Tone of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// The operation went through.
    Success,
    /// The operation failed; the message says why.
    Error,
}

/// Transient banner message, dismissed once its time-to-live has passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Success or error tone.
    pub kind: NoticeKind,
    /// Text shown to the user.
    pub message: String,
    /// When the notice appeared.
    pub shown_at: Instant,
}

impl Notice {
    /// Success notice shown now.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
            shown_at: Instant::now(),
        }
    }

    /// Error notice shown now.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
            shown_at: Instant::now(),
        }
    }

    /// True once `ttl` has elapsed since it was shown.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.shown_at) >= ttl
    }
}

/// Local state of one form: field values, edit mode, inline errors and a notice.
///
/// Values are whatever the form edits, typically a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormState<T> {
    /// Field values being edited.
    pub values: T,
    /// True while inputs are editable.
    pub editing: bool,
    /// Inline errors from the last validation failure.
    pub errors: Vec<FieldError>,
    /// Banner message, if any.
    pub notice: Option<Notice>,
}

impl<T> FormState<T> {
    /// Read-only form showing `values`.
    pub fn new(values: T) -> Self {
        Self {
            values,
            editing: false,
            errors: Vec::new(),
            notice: None,
        }
    }

    /// Enters edit mode and clears inline errors.
    pub fn begin_edit(&mut self) {
        self.editing = true;
        self.errors.clear();
    }

    /// Leaves edit mode showing `values`, discarding unsaved input.
    pub fn cancel_edit(&mut self, values: T) {
        self.values = values;
        self.editing = false;
        self.errors.clear();
    }

    /// Inline error for `field`, if any.
    pub fn error_for(&self, field: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.reason.as_str())
    }

    /// Drops the notice once `ttl` has elapsed.
    pub fn dismiss_expired(&mut self, now: Instant, ttl: Duration) {
        if self.notice.as_ref().is_some_and(|n| n.is_expired(now, ttl)) {
            self.notice = None;
        }
    }

    /// Folds a controller outcome into the form.
    ///
    /// Success leaves edit mode with a success notice. Validation failures
    /// become inline errors and keep the input. Other failures raise an
    /// error notice; when `restore` is given the fields show it (the
    /// rolled-back cache value), otherwise the user's input is kept.
    pub fn apply_outcome<U>(&mut self, outcome: &MutationOutcome<U>, success: &str, restore: Option<T>) {
        match outcome {
            MutationOutcome::Succeeded(_) => {
                self.editing = false;
                self.errors.clear();
                self.notice = Some(Notice::success(success));
            }
            MutationOutcome::Failed(MutationError::ValidationFailed(errors)) => {
                self.errors = errors.clone();
                self.notice = None;
            }
            MutationOutcome::Failed(err) => {
                self.errors.clear();
                self.notice = Some(Notice::error(err.user_message()));
                if let Some(values) = restore {
                    self.values = values;
                    self.editing = false;
                }
            }
        }
    }
}
