use std::path::PathBuf;

use thiserror::Error;

use crate::view::{MAX_ZOOM, MIN_ZOOM};

/// Every failure a user action can produce. None of them is fatal: the
/// triggering action is abandoned and the previous state stays in place.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("failed to open {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },

    #[error("invalid zoom level {input:?}: please enter a valid number (e.g., 0.125)")]
    InvalidInput { input: String },

    #[error("zoom level {value} is out of range: please enter a value between {min:.3} and {max:.3}")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("invalid config file {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl ViewerError {
    pub(crate) fn out_of_range(value: f64) -> Self {
        ViewerError::OutOfRange {
            value,
            min: MIN_ZOOM,
            max: MAX_ZOOM,
        }
    }

    /// Short title for the status line.
    pub fn title(&self) -> &'static str {
        match self {
            ViewerError::Open { .. } => "Open failed",
            ViewerError::Render { .. } => "Render failed",
            ViewerError::InvalidInput { .. } => "Invalid Input",
            ViewerError::OutOfRange { .. } => "Invalid Zoom Level",
            ViewerError::Config { .. } => "Invalid config",
        }
    }
}
