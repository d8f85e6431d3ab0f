//! WebSocket transport
//!
//! Optional second listener for browser-style clients. Each text message may
//! carry one or more newline-separated frames; each outbound frame is sent as
//! its own text message. Session handling matches the TCP transport: the send
//! loop drains the session's queue, the receive loop feeds the broker, and
//! whichever ends first tears the session down. Both loops run on the
//! connection's task so a send stalled at teardown can be abandoned and the
//! socket reset.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::session::{Outbound, Session};
use crate::utils::BrokerError;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

pub async fn start_websocket_server(addr: &str, broker: Arc<Broker>) -> Result<(), BrokerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve(listener, broker).await
}

pub async fn serve(listener: TcpListener, broker: Arc<Broker>) -> Result<(), BrokerError> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let broker = Arc::clone(&broker);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer.to_string(), broker).await {
                        warn!("WebSocket connection from {peer} failed: {e}");
                    }
                });
            }
            Err(e) => error!("Failed to accept connection: {e}"),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: String,
    broker: Arc<Broker>,
) -> Result<(), BrokerError> {
    let ws_stream = accept_async(stream).await?;
    let (session, rx) = broker.connect(peer)?;
    let (ws_sender, ws_receiver) = ws_stream.split();

    let ((ws_sender, stalled), ws_receiver) = tokio::join!(
        send_loop(ws_sender, rx, &broker, &session),
        receive_loop(ws_receiver, &broker, &session),
    );

    if stalled {
        // the send is stuck behind a full send buffer; reset the connection
        match ws_receiver.reunite(ws_sender) {
            Ok(ws_stream) => {
                if let Err(e) = ws_stream.get_ref().set_linger(Some(Duration::ZERO)) {
                    debug!("Failed to set linger for {}: {e}", session.id());
                }
            }
            Err(e) => debug!("Failed to reunite stream for {}: {e}", session.id()),
        }
    }

    info!("{} disconnected", session.id());
    Ok(())
}

/// Drain the session's queue onto the socket, one text message per frame.
///
/// Returns the sink and whether a send was still blocked when the session was
/// torn down.
async fn send_loop(
    mut ws_sender: WsSink,
    mut rx: mpsc::Receiver<Outbound>,
    broker: &Broker,
    session: &Session,
) -> (WsSink, bool) {
    while let Some(frame) = rx.recv().await {
        let sent = tokio::select! {
            biased;
            res = ws_sender.send(WsMessage::text(frame.to_string())) => Some(res),
            _ = session.closed() => None,
        };
        match sent {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!("Failed to send message to {}: {e}", session.id());
                broker.disconnect(session.id());
                return (ws_sender, false);
            }
            None => {
                debug!("Aborting stalled writer for {}", session.id());
                return (ws_sender, true);
            }
        }
    }

    // the queue only ends after teardown, so `closed()` is already resolved here
    tokio::select! {
        biased;
        _ = ws_sender.close() => {}
        _ = session.closed() => {}
    }
    debug!("Send loop closed for {}", session.id());
    (ws_sender, false)
}

/// Feed inbound text messages to the broker until the peer leaves or the
/// session is torn down. Always ends with the session disconnected.
async fn receive_loop(mut ws_receiver: WsSource, broker: &Broker, session: &Session) -> WsSource {
    let max_frame_size = broker.settings().max_frame_size;
    loop {
        let msg = tokio::select! {
            msg = ws_receiver.next() => msg,
            _ = session.closed() => break,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!("Connection error for {}: {e}", session.id());
                break;
            }
            None => break,
        };

        match msg {
            WsMessage::Text(text) => {
                if text.len() > max_frame_size {
                    warn!("{} sent an oversized frame", session.id());
                    break;
                }
                for line in text.as_str().split('\n') {
                    let line = line.trim_end_matches('\r');
                    if !line.trim().is_empty() {
                        broker.handle_line(session, line);
                    }
                }
            }
            WsMessage::Close(_) => break,
            WsMessage::Binary(_) => {
                warn!("{} sent a binary message, dropping", session.id());
            }
            // ping/pong/raw frames are handled by tungstenite
            _ => {}
        }
    }

    broker.disconnect(session.id());
    ws_receiver
}
