use std::net::SocketAddr;
use std::str::from_utf8;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::resp::{Resp, RespError, CTRLF};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("Protocol error")]
    Protocol(#[from] RespError),

    #[error("Connection closed")]
    Closed,
}

/// A RESP connection: buffered framing on the read side, and a write side that
/// is either the socket itself or a channel to a task that owns the socket.
#[derive(Debug)]
pub struct Connection {
    pub addr: SocketAddr,
    reader: OwnedReadHalf,
    buffer: BytesMut,
    outbound: Outbound,
}

#[derive(Debug)]
enum Outbound {
    Direct(OwnedWriteHalf),
    Forwarded(UnboundedSender<Bytes>),
}

impl Connection {
    pub fn new((tcp, addr): (TcpStream, SocketAddr)) -> Self {
        let (reader, writer) = tcp.into_split();
        Self {
            addr,
            reader,
            buffer: BytesMut::with_capacity(4096),
            outbound: Outbound::Direct(writer),
        }
    }

    pub async fn connect(host: &str, port: u16) -> Result<Self, ConnectionError> {
        let tcp = TcpStream::connect((host, port)).await?;
        let addr = tcp.peer_addr()?;
        Ok(Self::new((tcp, addr)))
    }

    /// Reads the next message along with the number of bytes it occupied on the
    /// wire. Returns `Ok(None)` once the peer is gone, including when it hangs up
    /// in the middle of a message.
    pub async fn read_resp(&mut self) -> Result<Option<(Resp, usize)>, ConnectionError> {
        let mut eof = false;
        loop {
            if !self.buffer.is_empty() {
                match Resp::parse_inner(&self.buffer, eof) {
                    Ok((resp, rest)) => {
                        let consumed = self.buffer.len() - rest.len();
                        self.buffer.advance(consumed);
                        return Ok(Some((resp, consumed)));
                    }
                    Err(err) if err.is_incomplete() => {}
                    Err(err) => return Err(err.into()),
                }
            }

            if eof {
                if !self.buffer.is_empty() {
                    debug!(peer = %self.addr, pending = self.buffer.len(), "peer hung up mid-message");
                }
                return Ok(None);
            }
            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                eof = true;
            }
        }
    }

    /// Reads a snapshot transfer: `$<len>\r\n` followed by exactly `len` raw
    /// bytes and no terminator.
    pub async fn read_snapshot(&mut self) -> Result<Bytes, ConnectionError> {
        loop {
            if let Some(end) = self.buffer.windows(2).position(|w| w == CTRLF) {
                if self.buffer[0] != b'$' {
                    return Err(RespError::UnsupportedType(self.buffer[0] as char).into());
                }
                let len: usize = from_utf8(&self.buffer[1..end])
                    .map_err(RespError::from)?
                    .parse()
                    .map_err(RespError::from)?;
                if self.buffer.len() >= end + 2 + len {
                    self.buffer.advance(end + 2);
                    return Ok(self.buffer.split_to(len).freeze());
                }
            }
            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return Err(ConnectionError::Closed);
            }
        }
    }

    pub async fn write_resp(&mut self, resp: &Resp) -> Result<(), ConnectionError> {
        self.write_all(&resp.encode()).await
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        match &mut self.outbound {
            Outbound::Direct(writer) => writer.write_all(bytes).await?,
            Outbound::Forwarded(sender) => sender
                .send(Bytes::copy_from_slice(bytes))
                .map_err(|_| ConnectionError::Closed)?,
        }
        Ok(())
    }

    /// Moves the socket's write half into a background task and returns the
    /// channel feeding it. Later writes on this connection go through the same
    /// channel, so everything stays in one ordered stream.
    pub fn forward_writes(&mut self) -> UnboundedSender<Bytes> {
        if let Outbound::Forwarded(sender) = &self.outbound {
            return sender.clone();
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let previous = std::mem::replace(&mut self.outbound, Outbound::Forwarded(sender.clone()));
        if let Outbound::Direct(writer) = previous {
            tokio::spawn(forward(writer, receiver, self.addr));
        }
        sender
    }

    pub async fn shutdown(&mut self) {
        if let Outbound::Direct(writer) = &mut self.outbound {
            let _ = writer.shutdown().await;
        }
    }
}

async fn forward(
    mut writer: OwnedWriteHalf,
    mut receiver: UnboundedReceiver<Bytes>,
    addr: SocketAddr,
) {
    while let Some(bytes) = receiver.recv().await {
        if let Err(err) = writer.write_all(&bytes).await {
            warn!(peer = %addr, ?err, "forwarding write failed");
            break;
        }
    }
    debug!(peer = %addr, "forwarding writer stopped");
}
