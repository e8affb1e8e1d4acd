//! Status payload served on `/status`.
//!
use serde::{Deserialize, Serialize};

/// Distraction state as seen by HTTP clients.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DistractionStatus {
    pub distracted: bool,
}

impl DistractionStatus {
    pub fn new(distracted: bool) -> Self {
        Self { distracted }
    }

    /// A visible face means the user is paying attention.
    pub fn from_face_presence(face_detected: bool) -> Self {
        Self::new(!face_detected)
    }
}
