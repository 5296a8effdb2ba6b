use std::sync::atomic::{AtomicI64, Ordering};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::ReplicaOf;
use crate::connection::{Connection, ConnectionError};
use crate::rdb::{Rdb, RdbError};
use crate::resp::Resp;
use crate::server::Server;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("primary closed the link during {0}")]
    Closed(&'static str),

    #[error("unexpected reply to {step}: {reply:?}")]
    UnexpectedReply { step: &'static str, reply: Resp },

    #[error("Connection error")]
    Connection(#[from] ConnectionError),

    #[error("Snapshot error")]
    Snapshot(#[from] RdbError),
}

/// Replica side of the link: connects out to the primary and applies whatever
/// it forwards.
#[derive(Debug)]
pub struct Replica {
    primary: ReplicaOf,
    listening_port: u16,
    replication_id: Mutex<String>,
    offset: AtomicI64,
}

impl Replica {
    pub fn new(primary: ReplicaOf, listening_port: u16) -> Self {
        Self {
            primary,
            listening_port,
            replication_id: Mutex::new("?".to_string()),
            offset: AtomicI64::new(-1),
        }
    }

    pub fn primary(&self) -> &ReplicaOf {
        &self.primary
    }

    pub async fn replication_id(&self) -> String {
        self.replication_id.lock().await.clone()
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Handshake, snapshot load, then the receive loop until the primary hangs up.
    pub async fn run(&self, server: &Server) -> Result<(), ReplicationError> {
        let mut conn = self.handshake(server).await?;
        self.receive(&mut conn, server).await
    }

    async fn handshake(&self, server: &Server) -> Result<Connection, ReplicationError> {
        let mut conn = Connection::connect(&self.primary.host, self.primary.port).await?;
        info!(primary = %self.primary, "connected to primary");

        exchange(&mut conn, "PING", Resp::command(["PING"])).await?;
        let port = self.listening_port.to_string();
        exchange(
            &mut conn,
            "REPLCONF listening-port",
            Resp::command(["REPLCONF", "listening-port", port.as_str()]),
        )
        .await?;
        exchange(
            &mut conn,
            "REPLCONF capa",
            Resp::command(["REPLCONF", "capa", "psync2"]),
        )
        .await?;

        let id = self.replication_id().await;
        let offset = self.offset().to_string();
        let psync = Resp::command(["PSYNC", id.as_str(), offset.as_str()]);
        let reply = exchange(&mut conn, "PSYNC", psync).await?;
        let (replication_id, offset) = parse_fullresync(&reply).ok_or_else(|| {
            ReplicationError::UnexpectedReply {
                step: "PSYNC",
                reply: Resp::SimpleString(reply.clone()),
            }
        })?;

        let snapshot = conn.read_snapshot().await?;
        let rdb = Rdb::decode(&snapshot)?;
        let loaded = server.db().load(rdb.entries).await;

        *self.replication_id.lock().await = replication_id;
        self.offset.store(offset, Ordering::SeqCst);
        info!(loaded, offset, "handshake complete");
        Ok(conn)
    }

    async fn receive(&self, conn: &mut Connection, server: &Server) -> Result<(), ReplicationError> {
        while let Some((resp, consumed)) = conn.read_resp().await? {
            match Command::parse(&resp) {
                Ok(Command::ReplConf(args))
                    if args.first().is_some_and(|arg| arg.eq_ignore_ascii_case("getack")) =>
                {
                    let offset = self.offset().to_string();
                    conn.write_resp(&Resp::command(["REPLCONF", "ACK", offset.as_str()]))
                        .await?;
                }
                Ok(Command::Ping(_)) => {}
                Ok(command) if command.is_write() => {
                    let reply = server.execute(&command).await;
                    if reply.is_error() {
                        warn!(?resp, ?reply, "forwarded write failed");
                    }
                }
                Ok(command) => debug!(command = command.name(), "ignoring forwarded command"),
                Err(err) => warn!(?resp, %err, "unparseable command from primary"),
            }
            self.offset.fetch_add(consumed as i64, Ordering::SeqCst);
        }
        info!(primary = %self.primary, "primary closed the replication link");
        Ok(())
    }
}

async fn exchange(
    conn: &mut Connection,
    step: &'static str,
    request: Resp,
) -> Result<String, ReplicationError> {
    conn.write_resp(&request).await?;
    match conn.read_resp().await? {
        Some((Resp::SimpleString(reply), _)) => {
            debug!(step, %reply, "handshake step");
            Ok(reply)
        }
        Some((reply, _)) => Err(ReplicationError::UnexpectedReply { step, reply }),
        None => Err(ReplicationError::Closed(step)),
    }
}

/// `FULLRESYNC <id> <offset>`
fn parse_fullresync(reply: &str) -> Option<(String, i64)> {
    let mut parts = reply.split_whitespace();
    if !parts.next()?.eq_ignore_ascii_case("FULLRESYNC") {
        return None;
    }
    let id = parts.next()?.to_string();
    let offset = parts.next()?.parse().ok()?;
    Some((id, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullresync_reply() {
        assert_eq!(
            parse_fullresync("FULLRESYNC 8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb 0"),
            Some(("8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb".to_string(), 0))
        );
        assert_eq!(parse_fullresync("CONTINUE"), None);
        assert_eq!(parse_fullresync("FULLRESYNC abc"), None);
    }

    #[test]
    fn starts_unsynced() {
        let replica = Replica::new(
            ReplicaOf {
                host: "localhost".to_string(),
                port: 6379,
            },
            6380,
        );
        assert_eq!(replica.offset(), -1);
    }
}
