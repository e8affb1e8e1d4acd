//! Sensors module.
//!
use anyhow::{Context, Result};
use rscam::{Camera, Config};
use simple_error::simple_error;

/// Capture one encoded frame, `None` if the capture failed.
pub type CaptureFn = Box<dyn FnMut() -> Option<Vec<u8>> + Send>;

/// Video device settings.
///
/// Unset resolution and frame rate are chosen as the best the device offers for `format`.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: String,
    pub format: String,
    pub resolution: Option<(u32, u32)>,
    /// Frame interval as `(numerator, denominator)` seconds.
    pub frame_interval: Option<(u32, u32)>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            format: "MJPG".into(),
            resolution: None,
            frame_interval: None,
        }
    }
}

/// Get a capture function to a video device on a Linux machine.
pub fn open_camera(config: &CameraConfig) -> Result<CaptureFn> {
    let mut cam = Camera::new(&config.device)
        .with_context(|| format!("cannot open webcam {}", &config.device))?;
    log_supported_formats(&cam, &config.format);
    let format = config.format.as_bytes();

    let resolution = match config.resolution {
        Some(resolution) => resolution,
        None => get_max_resolution(&cam, format)?,
    };

    let interval = match config.frame_interval {
        Some(interval) => interval,
        None => get_min_interval(&cam, format, resolution)?,
    };

    log::info!(
        "Using camera {} with {}x{} at {}/{}s per frame",
        &config.device,
        resolution.0,
        resolution.1,
        interval.0,
        interval.1
    );

    cam.start(&Config {
        interval,
        resolution,
        format,
        ..Default::default()
    })
    .with_context(|| format!("cannot start webcam {}", &config.device))?;

    let callback = move || match cam.capture() {
        Ok(frame) => Some(frame[..].to_vec()),
        Err(err) => {
            log::debug!("Capture failed: {err}");
            None
        }
    };
    Ok(Box::new(callback))
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    let resolution = match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => pick_max_resolution(&resolutions),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    };

    Ok(resolution.ok_or_else(|| simple_error!("No resolution found"))?)
}

/// Get the shortest supported frame interval for the given format and resolution.
fn get_min_interval(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame intervals: {:?}", &interval_info);
    let interval = match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => pick_min_interval(&intervals),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    };

    Ok(interval.ok_or_else(|| simple_error!("No frame rate found"))?)
}

/// Highest resolution in terms of number of pixels.
fn pick_max_resolution(resolutions: &[(u32, u32)]) -> Option<(u32, u32)> {
    resolutions
        .iter()
        .max_by_key(|(width, height)| width * height)
        .copied()
}

/// Shortest frame interval, i.e. the highest frame rate.
fn pick_min_interval(intervals: &[(u32, u32)]) -> Option<(u32, u32)> {
    intervals
        .iter()
        .filter(|(_, denominator)| *denominator > 0)
        .min_by(|(n_a, d_a), (n_b, d_b)| {
            // Compare n_a / d_a with n_b / d_b without floating point
            (*n_a as u64 * *d_b as u64).cmp(&(*n_b as u64 * *d_a as u64))
        })
        .copied()
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
