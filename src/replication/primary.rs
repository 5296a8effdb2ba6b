use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::{parse_integer, CommandError};
use crate::connection::{Connection, ConnectionError};
use crate::rdb::Rdb;
use crate::resp::Resp;
use crate::store::Store;

#[derive(Debug)]
struct ReplicaLink {
    sender: UnboundedSender<Bytes>,
    acked_offset: u64,
}

#[derive(Debug, Default)]
struct ReplicaTable {
    /// Bytes of replication traffic sent so far.
    offset: u64,
    replicas: HashMap<SocketAddr, ReplicaLink>,
}

impl ReplicaTable {
    /// Appends `bytes` to the replication stream of every replica, dropping
    /// replicas whose writer has gone away.
    fn broadcast(&mut self, bytes: Bytes) {
        self.offset += bytes.len() as u64;
        self.replicas.retain(|addr, link| match link.sender.send(bytes.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!(replica = %addr, "replica link closed, dropping it");
                false
            }
        });
    }

    fn acked_at(&self, offset: u64) -> usize {
        self.replicas
            .values()
            .filter(|link| link.acked_offset >= offset)
            .count()
    }
}

#[derive(Debug)]
pub struct Primary {
    replication_id: String,
    table: Mutex<ReplicaTable>,
    acked: Notify,
    write_order: Mutex<()>,
}

impl Primary {
    pub fn new(replication_id: String) -> Self {
        Self {
            replication_id,
            table: Mutex::new(ReplicaTable::default()),
            acked: Notify::new(),
            write_order: Mutex::new(()),
        }
    }

    pub fn replication_id(&self) -> &str {
        &self.replication_id
    }

    pub async fn offset(&self) -> u64 {
        self.table.lock().await.offset
    }

    pub async fn replica_count(&self) -> usize {
        self.table.lock().await.replicas.len()
    }

    /// Held from applying a write until it has been queued for every replica,
    /// so the replication stream sees writes in the order they were applied.
    pub async fn begin_write(&self) -> MutexGuard<'_, ()> {
        self.write_order.lock().await
    }

    pub async fn propagate(&self, command: &Resp) {
        let bytes = Bytes::from(command.encode());
        self.table.lock().await.broadcast(bytes);
    }

    /// Answers `PSYNC`: full resync marker, snapshot of the current keyspace,
    /// then the connection becomes a replica link.
    pub async fn handle_psync(
        &self,
        conn: &mut Connection,
        store: &Store,
    ) -> Result<(), ConnectionError> {
        // No write may land between the snapshot and the registration.
        let _order = self.begin_write().await;
        let offset = self.offset().await;
        let snapshot = Rdb::encode(&store.dump().await);

        let sender = conn.forward_writes();
        conn.write_resp(&Resp::simple_string(format!(
            "FULLRESYNC {} {}",
            self.replication_id, offset
        )))
        .await?;
        conn.write_resp(&Resp::BulkBytes(Bytes::from(snapshot))).await?;

        self.table.lock().await.replicas.insert(
            conn.addr,
            ReplicaLink {
                sender,
                acked_offset: 0,
            },
        );
        info!(replica = %conn.addr, offset, "replica registered");
        Ok(())
    }

    /// `REPLCONF` from a client or replica. `ACK` gets no reply.
    pub async fn handle_replconf(&self, addr: SocketAddr, args: &[String]) -> Option<Resp> {
        let Some(option) = args.first() else {
            return Some(CommandError::WrongArity("replconf".to_string()).into());
        };
        match option.to_ascii_lowercase().as_str() {
            "listening-port" | "capa" => Some(Resp::ok()),
            "ack" => {
                match args.get(1).map(|offset| parse_integer::<u64>(offset)) {
                    Some(Ok(offset)) => self.acknowledge(addr, offset).await,
                    _ => warn!(replica = %addr, ?args, "malformed REPLCONF ACK"),
                }
                None
            }
            _ => Some(Resp::error(format!(
                "ERR Unrecognized REPLCONF option: {option}"
            ))),
        }
    }

    pub async fn acknowledge(&self, addr: SocketAddr, offset: u64) {
        let mut table = self.table.lock().await;
        match table.replicas.get_mut(&addr) {
            Some(link) => link.acked_offset = link.acked_offset.max(offset),
            None => {
                debug!(peer = %addr, offset, "ACK from a connection that is not a replica");
                return;
            }
        }
        drop(table);
        self.acked.notify_waiters();
    }

    pub async fn unregister(&self, addr: SocketAddr) {
        if self.table.lock().await.replicas.remove(&addr).is_some() {
            info!(replica = %addr, "replica disconnected");
            self.acked.notify_waiters();
        }
    }

    /// Blocks until `wanted` replicas have acknowledged everything sent before
    /// the call, or until `timeout` runs out. Returns how many got there.
    pub async fn wait(&self, wanted: usize, timeout: Option<Duration>) -> usize {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let target = {
            let mut table = self.table.lock().await;
            if table.offset == 0 {
                return table.replicas.len();
            }
            let target = table.offset;
            let reached = table.acked_at(target);
            if reached >= wanted {
                return reached;
            }
            // GETACK travels on the replication stream itself, so it is
            // counted like any other propagated command.
            let getack = Resp::command(["REPLCONF", "GETACK", "*"]);
            table.broadcast(Bytes::from(getack.encode()));
            target
        };

        loop {
            let acked = self.acked.notified();
            tokio::pin!(acked);
            acked.as_mut().enable();

            let reached = self.table.lock().await.acked_at(target);
            if reached >= wanted {
                return reached;
            }
            match deadline {
                Some(deadline) => tokio::select! {
                    _ = &mut acked => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        return self.table.lock().await.acked_at(target);
                    }
                },
                None => acked.await,
            }
        }
    }
}
