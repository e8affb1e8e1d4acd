//! Annotated snapshots of the camera feed.
//!
//! Writing a preview is the headless way of checking that the camera is pointed at the user and
//! that landmarks land on the face.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut},
    rect::Rect,
};

use crate::nn::FaceLandmarks;

const ROI_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const JPEG_QUALITY: i32 = 90;

/// Periodically replaces a JPEG file with the latest annotated frame.
pub struct PreviewWriter {
    path: PathBuf,
    every_n_frames: u32,
    counter: u32,
}

impl PreviewWriter {
    pub fn new(path: impl Into<PathBuf>, every_n_frames: u32) -> Self {
        Self {
            path: path.into(),
            every_n_frames: every_n_frames.max(1),
            counter: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count a frame and write it if it is due.
    ///
    /// Returns whether the preview file was written.
    pub fn offer(&mut self, frame: &RgbImage, landmarks: Option<&FaceLandmarks>) -> Result<bool> {
        self.counter += 1;
        if self.counter < self.every_n_frames {
            return Ok(false);
        }
        self.counter = 0;

        let mut frame = frame.clone();
        if let Some(landmarks) = landmarks {
            draw_landmarks_on_image(&mut frame, landmarks);
        }
        self.write(&frame)?;

        Ok(true)
    }

    fn write(&self, frame: &RgbImage) -> Result<()> {
        let buf = turbojpeg::compress_image(frame, JPEG_QUALITY, turbojpeg::Subsamp::Sub2x2)
            .context("failed to compress preview")?;

        // Replace the file in one step so viewers never see a half-written image
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &buf[..])
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        log::trace!("Wrote preview to {}", self.path.display());
        Ok(())
    }
}

/// Draw the mesh region and every landmark onto the frame.
pub fn draw_landmarks_on_image(frame: &mut RgbImage, landmarks: &FaceLandmarks) {
    let (width, height) = frame.dimensions();
    let (width, height) = (width as f32, height as f32);

    let roi = landmarks.roi;
    let (x_tl, y_tl) = (roi[0] * width, roi[1] * height);
    let (x_br, y_br) = (roi[2] * width, roi[3] * height);
    let rect_width = (x_br - x_tl) as u32;
    let rect_height = (y_br - y_tl) as u32;
    if rect_width > 0 && rect_height > 0 {
        let roi_rect = Rect::at(x_tl as i32, y_tl as i32).of_size(rect_width, rect_height);
        draw_hollow_rect_mut(frame, roi_rect, ROI_COLOR);
    }

    for point in landmarks.points.iter() {
        let center = ((point.x * width) as i32, (point.y * height) as i32);
        draw_filled_circle_mut(frame, center, 1, LANDMARK_COLOR);
    }
}
