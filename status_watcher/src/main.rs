use std::{
    io::Write,
    time::{Duration, Instant},
};

use clap::Parser;
use env_logger::TimestampPrecision;
use status_watcher::{
    alert::{Blinker, Indicator, BLINK_INTERVAL},
    client::StatusClient,
    Error,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Status endpoint of the distraction server
    #[clap(long, default_value = "http://127.0.0.1:5000/status")]
    url: String,

    /// Time between two status checks
    #[clap(long, default_value_t = 1200)]
    interval_ms: u64,

    /// Give up on a status check after this long
    #[clap(long, default_value_t = 1000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let client = StatusClient::new(&args.url, Duration::from_millis(args.timeout_ms))?;
    log::info!("Watching {}", client.url());

    let mut statuses = client.spawn_poller(Duration::from_millis(args.interval_ms.max(1)));
    let mut blinker = Blinker::default();
    let mut shown = None;

    let mut blink_interval = tokio::time::interval(BLINK_INTERVAL / 3);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = statuses.recv() => match res {
                Some(Ok(status)) => {
                    log::debug!("Status received: {:?}", status);
                    blinker.on_status(status.distracted, Instant::now());
                }
                Some(Err(err)) => {
                    log::error!("Failed to fetch status from {}: {err}", args.url);
                    blinker.stop();
                }
                None => {
                    log::error!("Status polling ended");
                    break;
                }
            },
            _ = blink_interval.tick() => {}
            _ = &mut ctrl_c => {
                println!();
                break;
            }
        }

        let now = Instant::now();
        let state = (blinker.indicator_at(now), blinker.is_blinking(now));
        if shown != Some(state) {
            show(state)?;
            shown = Some(state);
        }
    }

    Ok(())
}

fn show((indicator, blinking): (Indicator, bool)) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    match (indicator, blinking) {
        (Indicator::Alert, true) => write!(stdout, "\r[!!] distracted "),
        (Indicator::Normal, true) => write!(stdout, "\r[  ] distracted "),
        (_, false) => write!(stdout, "\r[  ] focused    "),
    }?;
    stdout.flush()
}
