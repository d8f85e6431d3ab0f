use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::transport::frame::{self, Frame};
use crate::transport::tcp::read_frame;
use crate::utils::BrokerError;

/// Frames larger than this are rejected by the client as well.
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Line-protocol client for a `pubwire` broker.
///
/// Used by the `pub`/`sub` subcommands and by the end-to-end tests.
#[derive(Debug)]
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    buf: Vec<u8>,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self, BrokerError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            buf: Vec::new(),
        })
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), BrokerError> {
        let mut line = frame::encode(frame)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.send(&Frame::subscribe(topic)).await
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.send(&Frame::unsubscribe(topic)).await
    }

    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.send(&Frame::publish(topic, payload, retain)).await
    }

    pub async fn ping(&mut self) -> Result<(), BrokerError> {
        self.send(&Frame::ping()).await
    }

    /// Next frame from the broker, or `None` once the broker closed the connection.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, BrokerError> {
        loop {
            let Some(line) = read_frame(&mut self.reader, &mut self.buf, MAX_FRAME_SIZE).await?
            else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(frame::decode(&line)?));
        }
    }

    /// Flush and half-close the connection.
    pub async fn close(mut self) -> Result<(), BrokerError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
