//! HTTP client for the status endpoint.
//!
use std::time::Duration;

use common::status::DistractionStatus;
use reqwest::Client;
use tokio::{sync::mpsc, time::MissedTickBehavior};

use crate::Error;

pub struct StatusClient {
    client: Client,
    url: String,
}

impl StatusClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the current status, treating non-success responses as errors.
    pub async fn fetch(&self) -> Result<DistractionStatus, Error> {
        let resp = self.client.get(&self.url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Fetch the status every `period` on a task of its own.
    ///
    /// Results arrive on the returned channel. Polling stops once the receiver is dropped.
    pub fn spawn_poller(
        self,
        period: Duration,
    ) -> mpsc::Receiver<Result<DistractionStatus, Error>> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut poll_interval = tokio::time::interval(period);
            poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                poll_interval.tick().await;
                let res = self.fetch().await;
                if tx.send(res).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}
