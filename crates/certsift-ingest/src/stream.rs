//! Websocket consumer for the upstream CT event stream.
//!
//! Maintains a connection to the configured feed and forwards every text
//! frame into a bounded queue, in arrival order, until cancelled. The
//! upstream does not support resume, so frames missed while disconnected
//! are accepted as lost.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Configuration for the stream consumer.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Upstream websocket URL.
    pub url: String,

    /// Delay before redialing after a failed connection attempt.
    pub reconnect_delay: Duration,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Websocket consumer feeding the raw-frame queue.
///
/// If the queue is full the send blocks, which stalls the websocket read.
/// The upstream will eventually disconnect a stalled consumer; that is
/// handled like any other read error, by reconnecting.
pub struct StreamConsumer {
    config: StreamConfig,
    frames: mpsc::Sender<String>,
    shutdown: CancellationToken,
}

impl StreamConsumer {
    pub fn new(
        config: StreamConfig,
        frames: mpsc::Sender<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            frames,
            shutdown,
        }
    }

    /// Run until cancelled.
    ///
    /// All network errors are recoverable by reconnect; none are surfaced.
    /// Connection state transitions are logged, individual frames are not.
    pub async fn run(self) {
        tracing::info!(url = %self.config.url, "starting CT stream consumer");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let mut ws = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                dialed = connect_async(self.config.url.as_str()) => match dialed {
                    Ok((ws, _)) => {
                        tracing::info!(url = %self.config.url, "connected to CT stream");
                        metrics::gauge!("stream_connected").set(1.0);
                        ws
                    }
                    Err(e) => {
                        tracing::warn!(
                            url = %self.config.url,
                            error = %e,
                            "failed to connect to CT stream, retrying in {:?}",
                            self.config.reconnect_delay
                        );
                        metrics::counter!("stream_reconnects_total", "reason" => "dial").increment(1);
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.config.reconnect_delay) => continue,
                        }
                    }
                },
            };

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        let _ = ws.close(None).await;
                        metrics::gauge!("stream_connected").set(0.0);
                        tracing::info!("CT stream consumer cancelled");
                        return;
                    }
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            metrics::counter!("stream_frames_total").increment(1);
                            if self.frames.send(text.to_string()).await.is_err() {
                                // Frame queue closed: the pipeline is gone.
                                tracing::info!("frame queue closed, stopping consumer");
                                return;
                            }
                        }
                        // Binary frames are not part of the feed; ping/pong
                        // is answered by the protocol layer.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "CT stream read error, reconnecting");
                            break;
                        }
                        None => {
                            tracing::info!("CT stream closed by upstream, reconnecting");
                            break;
                        }
                    }
                }
            }

            metrics::gauge!("stream_connected").set(0.0);
            metrics::counter!("stream_reconnects_total", "reason" => "read").increment(1);
        }

        tracing::info!("CT stream consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_consumer_exits_without_dialing() {
        let (tx, _rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let consumer = StreamConsumer::new(
            StreamConfig::new("wss://127.0.0.1:1/"),
            tx,
            shutdown,
        );

        // Must return promptly rather than entering the dial/retry loop.
        tokio::time::timeout(Duration::from_secs(1), consumer.run())
            .await
            .expect("consumer did not observe cancellation");
    }

    #[tokio::test]
    async fn dial_failure_waits_for_cancellation() {
        let (tx, _rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        let consumer = StreamConsumer::new(
            StreamConfig::new("ws://127.0.0.1:1/"),
            tx,
            shutdown.clone(),
        );

        let handle = tokio::spawn(consumer.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer did not stop after cancellation")
            .unwrap();
    }
}
