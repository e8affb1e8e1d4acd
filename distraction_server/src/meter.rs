use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tokio::{task::JoinHandle, time::interval};

use crate::state::StatusBoard;

pub static METER: Meter = Meter::new();

/// Counters of analysed frames and frames with a face.
#[derive(Default)]
pub struct Meter {
    frames: AtomicU64,
    faces: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            frames: AtomicU64::new(0),
            faces: AtomicU64::new(0),
        }
    }

    pub fn tick_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_face(&self) {
        self.faces.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_frames(&self) -> u64 {
        self.frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_faces(&self) -> u64 {
        self.faces.swap(0, Ordering::Relaxed)
    }
}

/// Log the analysis rate every two seconds, or warn when the camera stalls.
pub fn spawn_meter_logger(board: Arc<StatusBoard>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let frames = METER.get_reset_frames();
            let faces = METER.get_reset_faces();
            let elapsed = start.elapsed().as_secs_f32();

            if frames > 0 {
                let fps = frames as f32 / elapsed;
                let face_share = faces as f32 / frames as f32 * 100.0;
                log::info!("Analysed frames per second: {fps:.2}, face visible in {face_share:.0}%")
            } else {
                match board.last_frame_timestamp_ms() {
                    Some(last_ms) => log::warn!(
                        "No frame analysed for {} ms",
                        now_ms().saturating_sub(last_ms)
                    ),
                    None => log::warn!("Still waiting for the first analysed frame"),
                }
            }
        }
    })
}

/// Wall clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
