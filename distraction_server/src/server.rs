//! Camera loop and HTTP server lifecycle.
//!
use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};

use crate::{
    endpoints::app, meter::spawn_meter_logger, monitor::DistractionMonitor, nn::FaceLandmarker,
    state::StatusBoard,
};

/// Sets the stop flag of the camera loop when dropped.
///
/// The runtime waits for blocking tasks on shutdown, so every way out of [`serve`] must stop the
/// loop.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Run the camera loop and serve the board on `addr` until `shutdown` resolves.
///
/// The address is bound before the camera loop starts. The function returns with an error if the
/// camera loop ends on its own.
pub async fn serve<L>(
    addr: SocketAddr,
    board: Arc<StatusBoard>,
    mut monitor: DistractionMonitor<L>,
    shutdown: impl Future<Output = ()>,
) -> Result<()>
where
    L: FaceLandmarker + Send + 'static,
{
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {addr}"))?;

    // Camera capture and inference block, keep them off the async workers
    let stop = Arc::new(AtomicBool::new(false));
    let stop_guard = StopOnDrop(stop.clone());
    let mut monitor_handle = tokio::task::spawn_blocking(move || monitor.run(&stop));

    let meter_handle = spawn_meter_logger(board.clone());

    log::info!("Serving distraction status on http://{addr}/status");
    let server = server
        .serve(app(board).into_make_service())
        .with_graceful_shutdown(shutdown);

    let result = tokio::select! {
        res = server => res.context("server error"),
        res = &mut monitor_handle => match res {
            Ok(Ok(())) => Err(anyhow::anyhow!("camera loop ended unexpectedly")),
            Ok(Err(err)) => Err(err.context("camera loop failed")),
            Err(err) => Err(anyhow::Error::new(err).context("camera loop panicked")),
        },
    };
    meter_handle.abort();

    drop(stop_guard);
    if result.is_ok() {
        monitor_handle.await??;
    }
    result
}
