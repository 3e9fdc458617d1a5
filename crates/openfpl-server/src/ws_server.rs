// WebSocket server: one task per client, one reply per text request.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::app::{handle_message, AppContext};
use crate::protocol::ServerMessage;

/// Bind the listener on `127.0.0.1:{port}`. Port 0 picks a free port.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    info!("WebSocket server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept connections forever, serving each on its own task.
pub async fn run(listener: TcpListener, ctx: Arc<AppContext>) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let addr = addr.to_string();
        info!("Accepted TCP connection from {addr}");

        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {addr}: {e}");
                    return;
                }
            };
            let (write, read) = ws_stream.split();
            match process_message_stream(read, write, &ctx, &addr).await {
                Ok(()) => info!("Client {addr} disconnected"),
                Err(e) => warn!("Connection to {addr} ended with error: {e}"),
            }
        });
    }
}

/// Read requests from `stream` and write one reply each to `sink`.
///
/// Generic over the stream and sink so it can be driven by in-memory
/// channels in tests.
pub async fn process_message_stream<St, Si>(
    mut stream: St,
    mut sink: Si,
    ctx: &AppContext,
    addr: &str,
) -> Result<(), WsError>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    Si: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let reply = handle_message(ctx, text.as_str()).await;
                sink.send(encode(&reply)).await?;
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            Ok(other) => {
                // Binary, Ping, Pong and raw frames carry no requests.
                debug!("ignoring non-text frame from {addr}: {other:?}");
            }
        }
    }
    Ok(())
}

fn encode(reply: &ServerMessage) -> Message {
    match serde_json::to_string(reply) {
        Ok(json) => Message::text(json),
        Err(e) => {
            warn!("failed to encode reply: {e}");
            Message::text(r#"{"type":"ERROR","message":"failed to encode reply"}"#)
        }
    }
}
