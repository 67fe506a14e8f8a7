//! Heartbeat service.
//!
//! Periodically posts a configured prompt as an [`InboundMessage`] on
//! the `heartbeat` channel. The agent loop routes it into the hidden
//! `agent:<id>:heartbeat` session, which is never listed and never
//! deletable.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use clawgate_types::event::InboundMessage;
use clawgate_types::session::HEARTBEAT_SESSION;

use crate::error::{Result, ServiceError};

/// A service that emits heartbeat messages at a regular interval.
pub struct HeartbeatService {
    interval: Duration,
    prompt: String,
    message_tx: mpsc::Sender<InboundMessage>,
}

impl HeartbeatService {
    /// Create a heartbeat service posting `prompt` every
    /// `interval_minutes`.
    pub fn new(
        interval_minutes: u64,
        prompt: String,
        message_tx: mpsc::Sender<InboundMessage>,
    ) -> Self {
        Self {
            interval: Duration::from_secs(interval_minutes * 60),
            prompt,
            message_tx,
        }
    }

    /// Override the raw interval (tests).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the heartbeat loop until cancelled.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            "heartbeat service started"
        );
        let mut interval = tokio::time::interval(self.interval);

        // The first tick fires immediately; skip it so the first
        // heartbeat happens after one full interval.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("heartbeat service shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {
                    let msg = InboundMessage {
                        channel: "heartbeat".to_string(),
                        sender_id: "system".to_string(),
                        chat_id: HEARTBEAT_SESSION.to_string(),
                        content: self.prompt.clone(),
                        session_key: HEARTBEAT_SESSION.to_string(),
                        timestamp: Utc::now(),
                        metadata: Default::default(),
                    };
                    if self.message_tx.send(msg).await.is_err() {
                        return Err(ServiceError::ChannelClosed);
                    }
                }
            }
        }
    }
}
