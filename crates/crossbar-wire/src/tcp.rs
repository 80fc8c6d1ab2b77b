//! TCP transport for channels between processes.
//!
//! Each connection starts with a [`Hello`] exchange in which both sides
//! announce the identifier they want to be known by, then carries
//! [`WireMessage`]s framed as a 4-byte big-endian length plus JSON body. A
//! writer task drains the channel's outbound queue onto the socket and a
//! reader task feeds decoded messages into the inbound queue.

use crate::channel::{ChannelLink, Transport, WireError};
use crate::message::{decode_length, decode_message, encode_message, WireMessage, MAX_MESSAGE_SIZE};
use crate::registry::Registry;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// First frame on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Identifier the sender is registered under on the other side.
    pub node_id: String,
    /// Protocol version.
    pub protocol_version: u32,
}

/// Outbound half of a TCP channel.
///
/// Messages are framed on `send`, so an oversized message fails that one send
/// and never reaches the socket. The writer task only copies frames.
struct FrameTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl Transport for FrameTransport {
    fn send(&self, message: WireMessage) -> Result<(), WireError> {
        let frame = encode_frame(&message)?;
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| WireError::ConnectionClosed),
            None => Err(WireError::ConnectionClosed),
        }
    }

    fn close(&self) {
        let mut tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        tx.take();
    }
}

/// Connect to `addr` and perform the hello exchange.
///
/// Returns the identifier the remote side announced and the channel link.
pub async fn connect(
    addr: impl ToSocketAddrs,
    local_id: &str,
) -> Result<(String, ChannelLink), WireError> {
    let stream = TcpStream::connect(addr).await?;
    establish(stream, local_id).await
}

/// Perform the hello exchange on an accepted connection.
pub async fn accept(stream: TcpStream, local_id: &str) -> Result<(String, ChannelLink), WireError> {
    establish(stream, local_id).await
}

/// Accept connections forever, registering each as a channel of `registry`.
pub async fn serve(listener: TcpListener, registry: Registry) {
    let local_id = registry.name().to_string();
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(peer = %addr, "Accepted connection");
                let registry = registry.clone();
                let local_id = local_id.clone();
                tokio::spawn(async move {
                    match accept(stream, &local_id).await {
                        Ok((remote_id, link)) => {
                            info!(peer = %addr, channel = %remote_id, "Inbound channel established");
                            registry.register_channel(remote_id, link);
                        }
                        Err(e) => warn!(peer = %addr, error = %e, "Handshake failed"),
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Accept error");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

async fn establish(stream: TcpStream, local_id: &str) -> Result<(String, ChannelLink), WireError> {
    let (mut reader, mut writer) = stream.into_split();

    let hello = Hello {
        node_id: local_id.to_string(),
        protocol_version: PROTOCOL_VERSION,
    };
    write_frame(&mut writer, &hello).await?;

    let remote: Hello = match read_frame(&mut reader).await {
        Ok(remote) => remote,
        Err(WireError::Json(e)) => {
            return Err(WireError::HandshakeFailed(format!("invalid hello: {e}")));
        }
        Err(e) => return Err(e),
    };
    if remote.protocol_version != PROTOCOL_VERSION {
        return Err(WireError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: remote.protocol_version,
        });
    }
    if remote.node_id.is_empty() {
        return Err(WireError::HandshakeFailed("empty node id".to_string()));
    }

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(writer, outbound_rx, remote.node_id.clone()));
    tokio::spawn(read_loop(reader, inbound_tx, remote.node_id.clone()));

    let transport = FrameTransport {
        tx: Mutex::new(Some(outbound_tx)),
    };
    let link = ChannelLink::new(Arc::new(transport), inbound_rx);
    Ok((remote.node_id, link))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    peer: String,
) {
    while let Some(frame) = outbound.recv().await {
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            debug!(channel = %peer, error = %e, "Write failed, closing connection");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<WireMessage>,
    peer: String,
) {
    loop {
        let len = match read_header(&mut reader).await {
            Ok(len) => len,
            Err(WireError::ConnectionClosed) => break,
            Err(e) => {
                debug!(channel = %peer, error = %e, "Connection ended");
                break;
            }
        };

        if len > MAX_MESSAGE_SIZE {
            warn!(channel = %peer, size = len, max = MAX_MESSAGE_SIZE, "Skipping oversized message");
            let mut body = (&mut reader).take(u64::from(len));
            match tokio::io::copy(&mut body, &mut tokio::io::sink()).await {
                Ok(skipped) if skipped == u64::from(len) => continue,
                _ => {
                    debug!(channel = %peer, "Connection ended inside an oversized message");
                    break;
                }
            }
        }

        let mut body = vec![0u8; len as usize];
        if let Err(e) = reader.read_exact(&mut body).await {
            debug!(channel = %peer, error = %e, "Connection ended");
            break;
        }
        match decode_message(&body) {
            Ok(message) => {
                if inbound.send(message).is_err() {
                    break;
                }
            }
            // The frame was consumed, so the stream is still aligned.
            Err(e) => warn!(channel = %peer, error = %e, "Skipping malformed message"),
        }
    }
}

/// Encode a value as one frame, refusing bodies over [`MAX_MESSAGE_SIZE`].
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    let frame = encode_message(msg)?;
    let size = frame.len() - 4;
    if size > MAX_MESSAGE_SIZE as usize {
        return Err(WireError::MessageTooLarge {
            size: u32::try_from(size).unwrap_or(u32::MAX),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(frame)
}

async fn read_header<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, WireError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => Ok(decode_length(&header)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WireError::ConnectionClosed),
        Err(e) => Err(WireError::Io(e)),
    }
}

/// Write a framed value (4-byte length + JSON).
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = encode_frame(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed value (4-byte length + JSON).
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, WireError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = read_header(reader).await?;
    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}
