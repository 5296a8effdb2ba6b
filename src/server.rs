use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::command::{Block, Command, CommandError, ReadFrom, XRead};
use crate::config::Config;
use crate::connection::{Connection, ConnectionError};
use crate::data::{StreamEntry, StreamId};
use crate::rdb::Rdb;
use crate::replication::Role;
use crate::resp::Resp;
use crate::store::{Db, Store, StoreError};

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct Server {
    config: Config,
    db: Db,
    role: Role,
}

impl Server {
    pub fn new(config: Config) -> Arc<Self> {
        let role = Role::from_config(&config);
        Arc::new(Self {
            config,
            db: Arc::new(Store::new()),
            role,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub async fn initialize(self: &Arc<Self>) {
        self.initialize_rdb().await;
        self.db.spawn_expiry_sweeper(EXPIRY_SWEEP_INTERVAL);
        if let Role::Replica(_) = self.role {
            self.initialize_replication();
        }
    }

    async fn initialize_rdb(&self) {
        let path = self.config.snapshot_path();
        match Rdb::load(&path).await {
            Ok(Some(rdb)) => {
                let loaded = self.db.load(rdb.entries).await;
                info!(path = %path.display(), loaded, "loaded snapshot");
            }
            Ok(None) => info!(path = %path.display(), "no snapshot, starting empty"),
            Err(err) => error!(path = %path.display(), ?err, "unreadable snapshot, starting empty"),
        }
    }

    fn initialize_replication(self: &Arc<Self>) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            if let Role::Replica(replica) = &server.role {
                if let Err(err) = replica.run(&server).await {
                    error!(primary = %replica.primary(), %err, "replication stopped");
                }
            }
        });
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, role = self.role.name(), "listening");
        loop {
            match listener.accept().await {
                Ok(accepted) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.handle_connection(Connection::new(accepted)).await });
                }
                Err(err) => warn!(?err, "failed to accept connection"),
            }
        }
    }

    async fn handle_connection(&self, mut conn: Connection) {
        debug!(peer = %conn.addr, "accepted connection");
        if let Err(err) = self.handle_requests(&mut conn).await {
            debug!(peer = %conn.addr, ?err, "connection ended with error");
        }
        if let Role::Primary(primary) = &self.role {
            primary.unregister(conn.addr).await;
        }
        conn.shutdown().await;
    }

    async fn handle_requests(&self, conn: &mut Connection) -> Result<(), ConnectionError> {
        while let Some((resp, _)) = conn.read_resp().await? {
            let reply = match Command::parse(&resp) {
                Ok(command) => self.dispatch(conn, &resp, command).await?,
                Err(err) => Some(err.into()),
            };
            if let Some(reply) = reply {
                conn.write_resp(&reply).await?;
            }
        }
        Ok(())
    }

    /// Routes a client command through the role. `None` means no reply is sent.
    async fn dispatch(
        &self,
        conn: &mut Connection,
        request: &Resp,
        command: Command,
    ) -> Result<Option<Resp>, ConnectionError> {
        let reply = match (&self.role, command) {
            (Role::Primary(primary), Command::ReplConf(args)) => {
                primary.handle_replconf(conn.addr, &args).await
            }
            (Role::Primary(primary), Command::Psync { .. }) => {
                primary.handle_psync(conn, &self.db).await?;
                None
            }
            (Role::Primary(primary), Command::Wait(wait)) => {
                let reached = primary.wait(wait.replicas, wait.timeout).await;
                Some(Resp::Integer(reached as i64))
            }
            (Role::Primary(primary), command) if command.is_write() => {
                let _order = primary.begin_write().await;
                let reply = self.execute(&command).await;
                if !reply.is_error() {
                    primary.propagate(request).await;
                }
                Some(reply)
            }
            (Role::Replica(_), command) if command.is_write() => Some(CommandError::ReadOnly.into()),
            (_, command) => Some(self.execute(&command).await),
        };
        Ok(reply)
    }

    /// Runs a command against the keyspace. Shared by client connections and
    /// the replica's apply loop.
    pub async fn execute(&self, command: &Command) -> Resp {
        match command {
            Command::Ping(None) => Resp::simple_string("PONG"),
            Command::Ping(Some(message)) => Resp::bulk_string(message.clone()),
            Command::Echo(message) => Resp::bulk_string(message.clone()),
            Command::Get(get) => match self.db.get(&get.key).await {
                Ok(Some(value)) => Resp::BulkString(value),
                Ok(None) => Resp::Null,
                Err(err) => err.into(),
            },
            Command::Set(set) => {
                let expires_at = match set.expiry {
                    Some(expiry) => match expiry.deadline(SystemTime::now()) {
                        Some(deadline) => Some(deadline),
                        None => return CommandError::InvalidExpiry("set".to_string()).into(),
                    },
                    None => None,
                };
                self.db
                    .set(set.key.clone(), set.value.clone(), expires_at)
                    .await;
                Resp::ok()
            }
            Command::Info(section) => match section.as_deref().map(str::to_ascii_lowercase) {
                None => Resp::bulk_string(self.role.info().await),
                Some(section) if section == "replication" => Resp::bulk_string(self.role.info().await),
                Some(_) => Resp::bulk_string(""),
            },
            Command::ConfigGet(parameters) => Resp::array(
                parameters
                    .iter()
                    .map(|parameter| parameter.to_ascii_lowercase())
                    .filter_map(|parameter| {
                        let value = self.config.get(&parameter)?.to_string();
                        Some([Resp::bulk_string(parameter), Resp::bulk_string(value)])
                    })
                    .flatten()
                    .collect(),
            ),
            Command::Keys(pattern) => Resp::array(
                self.db
                    .keys(pattern)
                    .await
                    .into_iter()
                    .map(Resp::bulk_string)
                    .collect(),
            ),
            Command::Type(key) => Resp::simple_string(self.db.type_of(key).await),
            Command::XAdd(xadd) => match self.db.xadd(&xadd.key, xadd.id, xadd.fields.clone()).await {
                Ok(id) => Resp::bulk_string(id.to_string()),
                Err(err) => err.into(),
            },
            Command::XRange(xrange) => {
                match self.db.xrange(&xrange.key, xrange.start, xrange.end).await {
                    Ok(entries) => Resp::array(entries.into_iter().map(Resp::from).collect()),
                    Err(err) => err.into(),
                }
            }
            Command::XRead(xread) => self.xread(xread).await,
            Command::ReplConf(_) | Command::Psync { .. } | Command::Wait(_) => {
                CommandError::UnsupportedCommand(command.name().to_string()).into()
            }
        }
    }

    async fn xread(&self, xread: &XRead) -> Resp {
        let mut streams = Vec::with_capacity(xread.streams.len());
        for (key, from) in &xread.streams {
            let after = match from {
                ReadFrom::After(id) => *id,
                ReadFrom::Latest => match self.db.last_stream_id(key).await {
                    Ok(id) => id.unwrap_or(StreamId::MIN),
                    Err(err) => return err.into(),
                },
            };
            streams.push((key.as_str(), after));
        }

        let Some(block) = xread.block else {
            return match self.read_streams(&streams).await {
                Ok(results) => streams_reply(results),
                Err(err) => err.into(),
            };
        };

        let deadline = match block {
            Block::Forever => None,
            Block::For(timeout) => Some(Instant::now() + timeout),
        };
        loop {
            let appended = self.db.appended().notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            match self.read_streams(&streams).await {
                Ok(results) if results.iter().all(|(_, entries)| !entries.is_empty()) => {
                    return streams_reply(results);
                }
                Ok(_) => {}
                Err(err) => return err.into(),
            }
            match deadline {
                Some(deadline) => tokio::select! {
                    _ = &mut appended => {}
                    _ = tokio::time::sleep_until(deadline) => return Resp::Null,
                },
                None => appended.await,
            }
        }
    }

    async fn read_streams<'k>(
        &self,
        streams: &[(&'k str, StreamId)],
    ) -> Result<Vec<(&'k str, Vec<StreamEntry>)>, StoreError> {
        let mut results = Vec::with_capacity(streams.len());
        for &(key, after) in streams {
            results.push((key, self.db.xread(key, after).await?));
        }
        Ok(results)
    }
}

fn streams_reply(results: Vec<(&str, Vec<StreamEntry>)>) -> Resp {
    Resp::array(
        results
            .into_iter()
            .map(|(key, entries)| {
                Resp::array(vec![
                    Resp::bulk_string(key),
                    Resp::array(entries.into_iter().map(Resp::from).collect()),
                ])
            })
            .collect(),
    )
}
