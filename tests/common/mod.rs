#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rudis::{Config, Resp, Server};

/// Starts a server on an ephemeral port. `extra` is appended to the command line.
pub async fn spawn_server(dir: &Path, extra: &[String]) -> (SocketAddr, Arc<Server>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut args = vec![
        "rudis".to_string(),
        "--port".to_string(),
        addr.port().to_string(),
        "--dir".to_string(),
        dir.display().to_string(),
    ];
    args.extend_from_slice(extra);
    let server = Server::new(Config::parse_from(args));
    server.initialize().await;
    tokio::spawn(Arc::clone(&server).serve(listener));
    (addr, server)
}

pub async fn spawn_primary() -> SocketAddr {
    spawn_server(&std::env::temp_dir(), &["--dbfilename".to_string(), "rudis-absent.rdb".to_string()])
        .await
        .0
}

pub async fn spawn_replica(primary: SocketAddr) -> SocketAddr {
    let extra = [
        "--dbfilename".to_string(),
        "rudis-absent.rdb".to_string(),
        "--replicaof".to_string(),
        format!("{} {}", primary.ip(), primary.port()),
    ];
    spawn_server(&std::env::temp_dir(), &extra).await.0
}

/// Polls `check` until it returns true or a couple of seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub struct TestClient {
    stream: TcpStream,
    buffer: BytesMut,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buffer: BytesMut::new(),
        }
    }

    /// Wraps an accepted socket, e.g. to play the primary's side of a link.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
        }
    }

    pub async fn send(&mut self, parts: &[&str]) -> Resp {
        self.write(parts).await;
        self.read().await
    }

    pub async fn write(&mut self, parts: &[&str]) {
        let request = Resp::command(parts.iter().copied());
        self.stream.write_all(&request.encode()).await.unwrap();
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn read(&mut self) -> Resp {
        loop {
            if !self.buffer.is_empty() {
                match Resp::parse_inner(&self.buffer, false) {
                    Ok((resp, rest)) => {
                        let consumed = self.buffer.len() - rest.len();
                        self.buffer.advance(consumed);
                        return resp;
                    }
                    Err(err) if err.is_incomplete() => {}
                    Err(err) => panic!("bad reply: {err:?}"),
                }
            }
            let n = self.stream.read_buf(&mut self.buffer).await.unwrap();
            assert_ne!(n, 0, "server closed the connection");
        }
    }
}
