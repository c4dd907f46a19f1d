//! Stdio transport: newline-delimited JSON-RPC on the standard streams.
//!
//! One message per line in, one per line out. Stdout carries only JSON-RPC;
//! all logging goes to stderr. Server-initiated notifications from the
//! event bus are interleaved onto stdout through the writer task.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::error::Result;
use crate::events::{EventBus, EventCallback, STANDARD_EVENTS};
use crate::mcp::processor::RequestProcessor;
use crate::mcp::protocol::JsonRpcNotification;
use crate::transport::{shutdown_refusal, TransportState};

pub struct StdioTransport {
    processor: Arc<RequestProcessor>,
    bus: Arc<EventBus>,
    state: Arc<TransportState>,
}

impl StdioTransport {
    pub fn new(processor: Arc<RequestProcessor>, bus: Arc<EventBus>) -> Self {
        Self {
            processor,
            bus,
            state: TransportState::new(),
        }
    }

    pub fn state(&self) -> Arc<TransportState> {
        self.state.clone()
    }

    /// Run until stdin closes or a shutdown signal arrives.
    pub async fn run(&self) -> Result<()> {
        info!("Stdio transport started");

        // Single writer task owns stdout so responses and bus notifications
        // never interleave mid-line.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = out_rx.recv().await {
                trace!("Sending: {line}");
                if stdout.write_all(line.as_bytes()).await.is_err()
                    || stdout.write_all(b"\n").await.is_err()
                    || stdout.flush().await.is_err()
                {
                    error!("Error writing to stdout");
                    break;
                }
            }
        });

        let subscriptions = subscribe_notifications(&self.bus, out_tx.clone());

        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        let ctrl_c = signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Shutdown signal received");
                    self.state.begin_shutdown();
                    break;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let frame = line.trim();
                            if frame.is_empty() {
                                continue;
                            }
                            trace!("Received: {frame}");
                            self.handle_frame(frame, &out_tx).await;
                        }
                        Ok(None) => {
                            debug!("EOF on stdin, stopping transport");
                            break;
                        }
                        Err(e) => {
                            error!("Error reading stdin: {e}");
                            break;
                        }
                    }
                }
            }
        }

        self.state.begin_shutdown();
        self.state.drain().await;

        for (event, cb) in subscriptions {
            self.bus.unsubscribe(event, &cb);
        }
        drop(out_tx);
        let _ = writer.await;

        info!("Stdio transport stopped");
        Ok(())
    }

    /// Dispatch one inbound line. The handler completes before the caller
    /// reads the next line.
    async fn handle_frame(&self, frame: &str, out_tx: &mpsc::UnboundedSender<String>) {
        let Some(_guard) = self.state.begin_request() else {
            let _ = out_tx.send(shutdown_refusal(frame));
            return;
        };
        if let Some(reply) = self.processor.process(frame, None).await {
            let _ = out_tx.send(reply);
        }
    }
}

/// Subscribe the outgoing stream to every standard event; each event is
/// framed as a JSON-RPC notification line. Returns the registered pairs so
/// the caller can unsubscribe on stop.
fn subscribe_notifications(
    bus: &EventBus,
    out_tx: mpsc::UnboundedSender<String>,
) -> Vec<(&'static str, EventCallback)> {
    STANDARD_EVENTS
        .iter()
        .map(|&event| {
            let out_tx = out_tx.clone();
            let cb: EventCallback = Arc::new(move |event_type, payload| {
                let notif = JsonRpcNotification::new(event_type, Some(payload.clone()));
                match serde_json::to_string(&notif) {
                    Ok(json) => {
                        let _ = out_tx.send(json);
                    }
                    Err(e) => error!("Failed to serialise notification: {e}"),
                }
            });
            bus.subscribe(event, cb.clone());
            (event, cb)
        })
        .collect()
}
