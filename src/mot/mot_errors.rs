use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackerError {
    #[error("bad tracker parameter `{name}`: {reason}")]
    BadParameter { name: &'static str, reason: String },
}

impl TrackerError {
    pub(crate) fn bad(name: &'static str, reason: impl Into<String>) -> Self {
        TrackerError::BadParameter {
            name,
            reason: reason.into(),
        }
    }
}
