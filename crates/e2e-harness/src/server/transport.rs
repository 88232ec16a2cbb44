// Driver transport
//
// Messages to and from the Playwright driver are JSON documents framed by a
// 4-byte little-endian length prefix, exchanged over the driver's stdio.

use crate::error::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

const CHUNK_SIZE: usize = 32_768;

/// Writes one length-prefixed JSON message and flushes
pub async fn send_message<W>(writer: &mut W, message: Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(&message)
        .map_err(|e| Error::Transport(format!("Failed to serialize JSON: {}", e)))?;
    let length = u32::try_from(bytes.len())
        .map_err(|_| Error::Transport(format!("Message too large: {} bytes", bytes.len())))?;

    writer
        .write_all(&length.to_le_bytes())
        .await
        .map_err(|e| Error::Transport(format!("Failed to write length: {}", e)))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| Error::Transport(format!("Failed to write message: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Transport(format!("Failed to flush: {}", e)))?;
    Ok(())
}

/// Sending half of a transport
pub trait TransportSender: Send + Unpin {
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport
pub trait TransportReceiver: Send + Unpin {
    /// Reads until the peer closes, forwarding each message
    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

impl<W> TransportSender for W
where
    W: AsyncWrite + Unpin + Send,
{
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { send_message(self, message).await })
    }
}

/// Reads framed messages from the driver's stdout
pub struct PipeReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    reader: R,
    message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> PipeReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        (Self { reader, message_tx }, message_rx)
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        let n = self
            .reader
            .read(&mut len_buf)
            .await
            .map_err(|e| Error::Transport(format!("Failed to read length prefix: {}", e)))?;
        if n == 0 {
            return Ok(None);
        }
        if n < 4 {
            self.reader
                .read_exact(&mut len_buf[n..])
                .await
                .map_err(|e| Error::Transport(format!("Truncated length prefix: {}", e)))?;
        }

        let length = u32::from_le_bytes(len_buf) as usize;
        let mut buf = Vec::with_capacity(length);
        let mut remaining = length;
        while remaining > 0 {
            let mut chunk = vec![0u8; remaining.min(CHUNK_SIZE)];
            self.reader
                .read_exact(&mut chunk)
                .await
                .map_err(|e| Error::Transport(format!("Failed to read message: {}", e)))?;
            remaining -= chunk.len();
            buf.extend_from_slice(&chunk);
        }
        Ok(Some(buf))
    }

    pub async fn run_loop(&mut self) -> Result<()> {
        while let Some(frame) = self.read_frame().await? {
            let message: Value = serde_json::from_slice(&frame)
                .map_err(|e| Error::Protocol(format!("Failed to parse JSON: {}", e)))?;
            if self.message_tx.send(message).is_err() {
                break;
            }
        }
        Ok(())
    }
}

impl<R> TransportReceiver for PipeReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.run_loop().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_framing_round_trip_over_duplex() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (mut receiver, mut rx) = PipeReceiver::new(server);
        let reader = tokio::spawn(async move { receiver.run_loop().await });

        send_message(&mut client, json!({"id": 1, "method": "goto"}))
            .await
            .unwrap();
        let large = "x".repeat(CHUNK_SIZE * 2 + 7);
        send_message(&mut client, json!({"payload": large}))
            .await
            .unwrap();
        drop(client);

        assert_eq!(rx.recv().await.unwrap()["method"], "goto");
        assert_eq!(
            rx.recv().await.unwrap()["payload"].as_str().unwrap().len(),
            CHUNK_SIZE * 2 + 7
        );
        assert!(rx.recv().await.is_none());
        reader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let mut out = Vec::new();
        send_message(&mut out, json!({})).await.unwrap();
        assert_eq!(&out[..4], &2u32.to_le_bytes());
        assert_eq!(&out[4..], b"{}");
    }

    #[tokio::test]
    async fn test_garbage_payload_is_protocol_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let (mut receiver, _rx) = PipeReceiver::new(server);
        client.write_all(&3u32.to_le_bytes()).await.unwrap();
        client.write_all(b"{{{").await.unwrap();
        drop(client);
        let err = receiver.run_loop().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
