//! Upload channel
//!
//! Persistent duplex connection to the upload service carrying
//! newline-delimited JSON tagged messages in both directions. Reconnects
//! automatically with a bounded attempt count and a fixed delay; the
//! orchestrator above this layer never sees the connection state. Sends
//! are fire-and-forget and all client state lives in the store.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};

use mcb_common::config::ChannelConfig;
use mcb_common::messages::{ClientMessage, ServerMessage};
use mcb_common::{Error, Result};

/// Upper bound on one wire frame. Slices carry at most ten items of
/// rendered wikitext, far below this; anything larger is a broken peer.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

enum ConnectionEnd {
    /// Transport dropped; the channel should reconnect
    Disconnected,
    /// Client side shut down; the channel task is done
    Finished,
}

/// Run the channel until the client shuts down or reconnection is
/// exhausted. Outbound messages are pulled from `outbound`; decoded server
/// pushes are forwarded to `inbound`.
pub async fn run_channel(
    config: &ChannelConfig,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<ServerMessage>,
) -> Result<()> {
    let endpoint = format!("{}:{}", config.host, config.port);
    let mut failed_attempts = 0u32;

    loop {
        match TcpStream::connect(&endpoint).await {
            Ok(stream) => {
                failed_attempts = 0;
                tracing::info!(%endpoint, "channel connected");
                match drive(stream, &mut outbound, &inbound).await {
                    ConnectionEnd::Finished => return Ok(()),
                    ConnectionEnd::Disconnected => {
                        tracing::warn!(%endpoint, "channel disconnected, reconnecting");
                        tokio::time::sleep(Duration::from_millis(config.reconnect_delay_ms)).await;
                    }
                }
            }
            Err(e) => {
                failed_attempts += 1;
                if failed_attempts >= config.reconnect_attempts {
                    return Err(Error::Channel(format!(
                        "giving up after {failed_attempts} connect attempts: {e}"
                    )));
                }
                tracing::warn!(
                    %endpoint,
                    attempt = failed_attempts,
                    error = %e,
                    "channel connect failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(config.reconnect_delay_ms)).await;
            }
        }
    }
}

/// Pump one live connection in both directions until it drops or the
/// client side goes away. Undecodable inbound frames are skipped, not
/// fatal.
async fn drive(
    stream: TcpStream,
    outbound: &mut mpsc::UnboundedReceiver<ClientMessage>,
    inbound: &mpsc::UnboundedSender<ServerMessage>,
) -> ConnectionEnd {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    let line = match serde_json::to_string(&message) {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!(error = %e, "unencodable outbound message dropped");
                            continue;
                        }
                    };
                    if framed.send(line).await.is_err() {
                        return ConnectionEnd::Disconnected;
                    }
                }
                None => return ConnectionEnd::Finished,
            },
            frame = framed.next() => match frame {
                Some(Ok(line)) => match serde_json::from_str::<ServerMessage>(&line) {
                    Ok(message) => {
                        if inbound.send(message).is_err() {
                            return ConnectionEnd::Finished;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable inbound frame skipped");
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "channel read error");
                    return ConnectionEnd::Disconnected;
                }
                None => return ConnectionEnd::Disconnected,
            },
        }
    }
}
