//! TCP transport
//!
//! Accepts connections and runs one task pair per session:
//! - the reader splits the byte stream on `\n`, hands each complete line to
//!   the broker, and stops on EOF, read error, oversized frame, or when the
//!   session is torn down from elsewhere
//! - the writer drains the session's outbound queue onto the socket, one
//!   frame per line, and shuts the socket down once the queue closes. A write
//!   still blocked when the session is torn down is abandoned and the socket
//!   is reset, so a peer that stopped reading cannot pin the connection
//!
//! Either side ending triggers `Broker::disconnect`, which is idempotent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::session::{Outbound, Session};
use crate::utils::BrokerError;

/// Bind `addr` and serve until the listener fails. Bind errors are returned
/// so the caller can exit non-zero.
pub async fn start_tcp_server(addr: &str, broker: Arc<Broker>) -> Result<(), BrokerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("TCP server listening on {}", listener.local_addr()?);
    serve(listener, broker).await
}

/// Accept loop over an already bound listener.
pub async fn serve(listener: TcpListener, broker: Arc<Broker>) -> Result<(), BrokerError> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                // per-connection accept failures (e.g. EMFILE) are not fatal
                error!("Failed to accept connection: {e}");
                continue;
            }
        };
        tokio::spawn(handle_connection(stream, peer, Arc::clone(&broker)));
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, broker: Arc<Broker>) {
    let (session, rx) = match broker.connect(peer.to_string()) {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Refusing connection from {peer}: {e}");
            return;
        }
    };

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(write_half, rx, Arc::clone(&broker), Arc::clone(&session)));

    let max_frame_size = broker.settings().max_frame_size;
    if let Err(e) = read_loop(read_half, &broker, &session, max_frame_size).await {
        warn!("Connection error for {}: {e}", session.id());
    }

    broker.disconnect(session.id());
    info!("{} disconnected", session.id());
}

async fn read_loop(
    read_half: OwnedReadHalf,
    broker: &Broker,
    session: &Session,
    max_frame_size: usize,
) -> Result<(), BrokerError> {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(1024);

    loop {
        let line = tokio::select! {
            res = read_frame(&mut reader, &mut buf, max_frame_size) => res?,
            _ = session.closed() => return Ok(()),
        };
        let Some(line) = line else {
            debug!("{} closed the connection", session.id());
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        broker.handle_line(session, &line);
    }
}

/// Read one newline-terminated frame into an owned string.
///
/// `Ok(None)` means the peer closed the stream; a trailing partial frame is
/// discarded. Bytes that are not UTF-8 are replaced so the frame reaches the
/// JSON decoder and is rejected there, keeping the session alive.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_frame_size: usize,
) -> Result<Option<String>, BrokerError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    // one extra byte leaves room for the delimiter of a max-sized frame
    let limit = max_frame_size as u64 + 1;
    let read = reader.take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&b'\n') {
        if buf.len() as u64 >= limit {
            return Err(BrokerError::FrameTooLarge(max_frame_size));
        }
        // EOF in the middle of a frame
        return Ok(None);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Outbound>,
    broker: Arc<Broker>,
    session: Arc<Session>,
) {
    // teardown drops the sender, so `recv` drains what is queued and then ends
    while let Some(frame) = rx.recv().await {
        let written = tokio::select! {
            biased;
            res = write_frame(&mut writer, &frame) => Some(res),
            _ = session.closed() => None,
        };
        match written {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!("Failed to send message to {}: {e}", session.id());
                broker.disconnect(session.id());
                return;
            }
            None => {
                // the write is stuck behind a full send buffer; reset the connection
                debug!("Aborting stalled writer for {}", session.id());
                if let Err(e) = writer.as_ref().set_linger(Some(Duration::ZERO)) {
                    debug!("Failed to set linger for {}: {e}", session.id());
                }
                return;
            }
        }
    }

    let _ = writer.shutdown().await;
    debug!("Send loop closed for {}", session.id());
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &str) -> std::io::Result<()> {
    let mut line = Vec::with_capacity(frame.len() + 1);
    line.extend_from_slice(frame.as_bytes());
    line.push(b'\n');
    writer.write_all(&line).await
}
