use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, Role};
use tokio_tungstenite::WebSocketStream;

use novagen_engine::{ChannelConnection, ProgressConnection, ProgressHub};
use novagen_types::{sys_debug, sys_info, JobId};

pub static ACTIVE_WS_CONNECTIONS: AtomicU32 = AtomicU32::new(0);

type WsError = Box<dyn std::error::Error + Send + Sync>;

/// Serve one progress subscription until the client leaves.
///
/// The hub pushes serialized events into this connection's channel; this
/// task is the only writer to the socket. Text `ping` is answered with
/// `pong`, protocol pings with pongs; everything else inbound is ignored.
pub async fn handle_progress_ws(
    upgraded: Upgraded,
    job_id: JobId,
    hub: Arc<ProgressHub>,
) -> Result<(), WsError> {
    let ws_stream = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (connection, mut outbound) = ChannelConnection::open();
    let connection_id = connection.id();
    hub.subscribe(&job_id, Arc::new(connection));

    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    sys_info!(
        "[WS_PROGRESS] Client connected to job {} ({} active)",
        job_id,
        count
    );

    let result: Result<(), WsError> = loop {
        tokio::select! {
            event = outbound.recv() => match event {
                Some(text) => {
                    if let Err(e) = ws_sender.send(WsMessage::Text(text)).await {
                        break Err(e.into());
                    }
                }
                // Hub dropped us after a failed delivery.
                None => break Ok(()),
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) if text.trim() == "ping" => {
                    if let Err(e) = ws_sender.send(WsMessage::Text("pong".to_string())).await {
                        break Err(e.into());
                    }
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    if let Err(e) = ws_sender.send(WsMessage::Pong(payload)).await {
                        break Err(e.into());
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                Some(Ok(other)) => {
                    sys_debug!("[WS_PROGRESS] Ignoring inbound {} byte message", other.len());
                }
                Some(Err(e)) => break Err(e.into()),
            },
        }
    };

    hub.unsubscribe(&job_id, connection_id);
    let remaining = ACTIVE_WS_CONNECTIONS
        .fetch_sub(1, Ordering::SeqCst)
        .saturating_sub(1);
    sys_info!(
        "[WS_PROGRESS] Client left job {} ({} active)",
        job_id,
        remaining
    );
    result
}
