//! Latest observation shared between the camera loop and the HTTP server.
//!
use std::sync::{Mutex, MutexGuard, PoisonError};

use common::status::DistractionStatus;

use crate::nn::FaceLandmarks;

#[derive(Debug, Default)]
struct Observation {
    landmarks: Option<FaceLandmarks>,
    status: DistractionStatus,
    frame_timestamp_ms: Option<u64>,
}

/// Single lock around the most recent frame result.
///
/// Every write replaces the whole observation, so readers always see the result of one frame.
#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: Mutex<Observation>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the landmarks found in a frame and derive the distraction status from them.
    pub fn record(&self, landmarks: Option<FaceLandmarks>, timestamp_ms: u64) -> DistractionStatus {
        let status = DistractionStatus::from_face_presence(landmarks.is_some());

        let mut observation = self.lock();
        observation.landmarks = landmarks;
        observation.status = status;
        observation.frame_timestamp_ms = Some(timestamp_ms);

        status
    }

    pub fn status(&self) -> DistractionStatus {
        self.lock().status
    }

    pub fn latest_landmarks(&self) -> Option<FaceLandmarks> {
        self.lock().landmarks.clone()
    }

    /// Timestamp of the last recorded frame in milliseconds since the Unix epoch.
    pub fn last_frame_timestamp_ms(&self) -> Option<u64> {
        self.lock().frame_timestamp_ms
    }

    fn lock(&self) -> MutexGuard<'_, Observation> {
        // Writers never leave a partial observation behind
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
