//! Distraction server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use distraction_server::{
    monitor::DistractionMonitor,
    nn::{LandmarkerConfig, MeshLandmarker, UltrafaceVariant, DEFAULT_ROI_PADDING},
    preview::PreviewWriter,
    sensors::{open_camera, CameraConfig},
    server::serve,
    state::StatusBoard,
    utils::resolve_model_path,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the status endpoint on
    #[clap(long, default_value = "127.0.0.1:5000")]
    server_address: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Pixel format requested from the camera
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Capture width, the largest supported resolution is used if unset
    #[clap(long, requires = "height")]
    width: Option<u32>,

    /// Capture height
    #[clap(long, requires = "width")]
    height: Option<u32>,

    /// Capture frame rate, the highest supported one is used if unset
    #[clap(long)]
    fps: Option<u32>,

    /// Face detector network variant
    #[clap(long, value_enum, default_value_t = UltrafaceVariant::W320H240)]
    detector_variant: UltrafaceVariant,

    /// Face detector model, defaults to the variant's file name
    #[clap(long)]
    detector_model: Option<PathBuf>,

    /// Where to download the face detector from if the model file is missing
    #[clap(long)]
    detector_url: Option<String>,

    /// Face mesh landmark model
    #[clap(long, default_value = "face_landmark.onnx")]
    landmark_model: PathBuf,

    /// Minimum confidence of a face detection
    #[clap(long, default_value_t = 0.5)]
    min_detection_confidence: f32,

    /// Minimum face presence score for landmarks to count
    #[clap(long, default_value_t = 0.5)]
    min_presence_confidence: f32,

    /// Minimum face presence score to keep tracking without detection
    #[clap(long, default_value_t = 0.5)]
    min_tracking_confidence: f32,

    /// Maximum overlap of two detected faces before the weaker one is dropped
    #[clap(long, default_value_t = 0.5)]
    max_iou: f32,

    /// Analyse frames as captured instead of mirrored
    #[clap(long)]
    no_mirror: bool,

    /// Keep an annotated JPEG of the camera feed at this path
    #[clap(long)]
    preview_path: Option<PathBuf>,

    /// Update the preview every this many frames
    #[clap(long, default_value_t = 30)]
    preview_every: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let addr: SocketAddr = args
        .server_address
        .parse()
        .with_context(|| format!("invalid server address {}", &args.server_address))?;

    // Models first, no point in opening the camera without them
    let variant = args.detector_variant;
    let detector_model = args
        .detector_model
        .clone()
        .unwrap_or_else(|| PathBuf::from(variant.filename()));
    let detector_url = args.detector_url.clone().unwrap_or_else(|| variant.url());
    let detector_model = resolve_model_path(&detector_model, Some(&detector_url)).await?;
    let landmark_model = resolve_model_path(&args.landmark_model, None).await?;

    let config = LandmarkerConfig {
        min_detection_confidence: args.min_detection_confidence,
        min_presence_confidence: args.min_presence_confidence,
        min_tracking_confidence: args.min_tracking_confidence,
        max_iou: args.max_iou,
        roi_padding: DEFAULT_ROI_PADDING,
    };
    let landmarker = MeshLandmarker::new(&detector_model, variant, &landmark_model, config)
        .context("error creating face landmarker")?;

    let camera_config = CameraConfig {
        device: args.device.clone(),
        format: args.format.clone(),
        resolution: args.width.zip(args.height),
        frame_interval: args.fps.map(|fps| (1, fps)),
    };
    let capture_fn = open_camera(&camera_config)?;

    // Shared state between the camera loop and the HTTP server
    let board = Arc::new(StatusBoard::new());

    let mut monitor = DistractionMonitor::new(capture_fn, landmarker, board.clone())
        .with_mirror(!args.no_mirror);
    if let Some(preview_path) = args.preview_path.clone() {
        let preview = PreviewWriter::new(preview_path, args.preview_every);
        log::info!("Writing preview to {}", preview.path().display());
        monitor = monitor.with_preview(preview);
    }

    serve(addr, board, monitor, shutdown_signal()).await?;
    log::info!("Application exiting");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}
