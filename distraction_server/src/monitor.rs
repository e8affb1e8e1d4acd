//! Camera loop turning frames into distraction status updates.
//!
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use common::status::DistractionStatus;
use image::RgbImage;

use crate::{
    meter::{now_ms, METER},
    nn::FaceLandmarker,
    preview::PreviewWriter,
    sensors::CaptureFn,
    state::StatusBoard,
};

/// Pause before retrying a failed capture.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(5);

pub struct DistractionMonitor<L> {
    capture_fn: CaptureFn,
    landmarker: L,
    board: Arc<StatusBoard>,
    mirror: bool,
    preview: Option<PreviewWriter>,
    last_status: Option<DistractionStatus>,
}

impl<L: FaceLandmarker> DistractionMonitor<L> {
    pub fn new(capture_fn: CaptureFn, landmarker: L, board: Arc<StatusBoard>) -> Self {
        Self {
            capture_fn,
            landmarker,
            board,
            mirror: true,
            preview: None,
            last_status: None,
        }
    }

    /// Flip frames horizontally before analysis, like a selfie view. Enabled by default.
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_preview(mut self, preview: PreviewWriter) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Capture and analyse frames until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        log::info!("Starting camera feed and landmark detection");

        while !stop.load(Ordering::Relaxed) {
            let Some(jpeg) = (self.capture_fn)() else {
                log::warn!("Ignoring empty camera frame");
                std::thread::sleep(CAPTURE_RETRY_DELAY);
                continue;
            };

            if let Err(err) = self.process_frame(&jpeg) {
                log::warn!("Skipping frame: {err:#}");
            }
        }

        log::info!("Camera and detection loop stopped");
        Ok(())
    }

    /// Analyse one encoded frame and publish the result on the board.
    pub fn process_frame(&mut self, jpeg: &[u8]) -> Result<DistractionStatus> {
        let mut frame: RgbImage =
            turbojpeg::decompress_image(jpeg).context("failed to decompress frame")?;
        if self.mirror {
            image::imageops::flip_horizontal_in_place(&mut frame);
        }

        let landmarks = self.landmarker.detect(&frame)?;
        METER.tick_frame();
        if landmarks.is_some() {
            METER.tick_face();
        }

        if let Some(preview) = self.preview.as_mut() {
            if let Err(err) = preview.offer(&frame, landmarks.as_ref()) {
                log::warn!("Failed to write preview: {err:#}");
            }
        }

        let status = self.board.record(landmarks, now_ms());
        if self.last_status != Some(status) {
            log::info!("Distracted: {}", status.distracted);
            self.last_status = Some(status);
        }

        Ok(status)
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;

    use image::Rgb;

    use super::*;
    use crate::nn::{FaceLandmarks, Landmark};

    /// Landmarker replaying a script of answers. Reports a face for bright frames otherwise.
    struct ScriptedLandmarker {
        answers: VecDeque<Result<bool>>,
        seen_left_pixels: Vec<Rgb<u8>>,
    }

    impl ScriptedLandmarker {
        fn new(answers: Vec<Result<bool>>) -> Self {
            Self {
                answers: answers.into(),
                seen_left_pixels: vec![],
            }
        }
    }

    impl FaceLandmarker for &mut ScriptedLandmarker {
        fn detect(&mut self, frame: &RgbImage) -> Result<Option<FaceLandmarks>> {
            self.seen_left_pixels.push(frame[(0, 0)]);
            let face = match self.answers.pop_front() {
                Some(answer) => answer?,
                None => frame[(0, 0)][0] > 128,
            };

            Ok(face.then(|| FaceLandmarks {
                points: vec![Landmark {
                    x: 0.5,
                    y: 0.5,
                    z: 0.0,
                }],
                presence: 0.9,
                roi: [0.25, 0.25, 0.75, 0.75],
            }))
        }
    }

    fn encoded_frame(left: Rgb<u8>, right: Rgb<u8>) -> Vec<u8> {
        let frame = RgbImage::from_fn(32, 16, |x, _| if x < 16 { left } else { right });
        turbojpeg::compress_image(&frame, 100, turbojpeg::Subsamp::None)
            .unwrap()
            .to_vec()
    }

    fn no_capture() -> CaptureFn {
        Box::new(|| None)
    }

    #[test]
    fn test_face_and_no_face() -> Result<()> {
        let board = Arc::new(StatusBoard::new());
        let mut landmarker = ScriptedLandmarker::new(vec![Ok(true), Ok(false), Ok(true)]);
        let mut monitor = DistractionMonitor::new(no_capture(), &mut landmarker, board.clone());
        let frame = encoded_frame(Rgb([0, 0, 0]), Rgb([0, 0, 0]));
        let before_ms = now_ms();

        assert!(!monitor.process_frame(&frame)?.distracted);
        assert!(!board.status().distracted);
        assert!(board.latest_landmarks().is_some());

        assert!(monitor.process_frame(&frame)?.distracted);
        assert!(board.status().distracted);
        assert!(board.latest_landmarks().is_none());

        assert!(!monitor.process_frame(&frame)?.distracted);
        assert!(!board.status().distracted);
        assert!(board.last_frame_timestamp_ms() >= Some(before_ms));

        Ok(())
    }

    #[test]
    fn test_frames_are_mirrored() -> Result<()> {
        let board = Arc::new(StatusBoard::new());
        let mut landmarker = ScriptedLandmarker::new(vec![]);
        let white = Rgb([255, 255, 255]);
        let black = Rgb([0, 0, 0]);
        let frame = encoded_frame(white, black);

        {
            let mut monitor =
                DistractionMonitor::new(no_capture(), &mut landmarker, board.clone());
            // White is on the right after flipping, so no face
            assert!(monitor.process_frame(&frame)?.distracted);
        }
        {
            let mut monitor = DistractionMonitor::new(no_capture(), &mut landmarker, board.clone())
                .with_mirror(false);
            assert!(!monitor.process_frame(&frame)?.distracted);
        }

        assert!(landmarker.seen_left_pixels[0][0] < 10);
        assert!(landmarker.seen_left_pixels[1][0] > 245);

        Ok(())
    }

    #[test]
    fn test_failed_frames_keep_previous_status() -> Result<()> {
        let board = Arc::new(StatusBoard::new());
        let mut landmarker =
            ScriptedLandmarker::new(vec![Ok(false), Err(anyhow::anyhow!("boom"))]);
        let mut monitor = DistractionMonitor::new(no_capture(), &mut landmarker, board.clone());
        let frame = encoded_frame(Rgb([0, 0, 0]), Rgb([0, 0, 0]));

        assert!(monitor.process_frame(&frame)?.distracted);
        assert!(monitor.process_frame(&frame).is_err());
        assert!(monitor.process_frame(b"not a jpeg").is_err());
        assert!(board.status().distracted);

        Ok(())
    }

    #[test]
    fn test_run_skips_empty_captures_until_stopped() -> Result<()> {
        let board = Arc::new(StatusBoard::new());
        let stop = Arc::new(AtomicBool::new(false));
        let frame = encoded_frame(Rgb([0, 0, 0]), Rgb([0, 0, 0]));

        let mut captures: VecDeque<Option<Vec<u8>>> =
            vec![None, Some(frame.clone()), None, Some(frame)].into();
        let capture_stop = stop.clone();
        let capture_fn: CaptureFn = Box::new(move || {
            let capture = captures.pop_front();
            if captures.is_empty() {
                capture_stop.store(true, Ordering::Relaxed);
            }
            capture.flatten()
        });

        let mut landmarker = ScriptedLandmarker::new(vec![Ok(false), Ok(true)]);
        let mut monitor = DistractionMonitor::new(capture_fn, &mut landmarker, board.clone());
        monitor.run(&stop)?;
        drop(monitor);

        assert_eq!(landmarker.seen_left_pixels.len(), 2);
        assert!(!board.status().distracted);

        Ok(())
    }

    #[test]
    fn test_landmarker_errors_do_not_stop_the_loop() -> Result<()> {
        let board = Arc::new(StatusBoard::new());
        let stop = Arc::new(AtomicBool::new(false));
        let frame = encoded_frame(Rgb([0, 0, 0]), Rgb([0, 0, 0]));

        let mut remaining = 3;
        let capture_stop = stop.clone();
        let capture_fn: CaptureFn = Box::new(move || {
            remaining -= 1;
            if remaining == 0 {
                capture_stop.store(true, Ordering::Relaxed);
            }
            Some(frame.clone())
        });

        let mut landmarker =
            ScriptedLandmarker::new(vec![Err(anyhow::anyhow!("boom")), Ok(true), Ok(false)]);
        let mut monitor = DistractionMonitor::new(capture_fn, &mut landmarker, board.clone());
        monitor.run(&stop)?;
        drop(monitor);

        assert_eq!(landmarker.seen_left_pixels.len(), 3);
        assert!(board.status().distracted);

        Ok(())
    }
}
