mod primary;
mod replica;

pub use primary::Primary;
pub use replica::{Replica, ReplicationError};

use std::collections::hash_map::RandomState;
use std::fmt::Write;
use std::hash::{BuildHasher, Hasher};

use crate::config::Config;

/// The replication half of a server: which side of the link it is on, and the
/// state that side keeps.
#[derive(Debug)]
pub enum Role {
    Primary(Primary),
    Replica(Replica),
}

impl Role {
    pub fn from_config(config: &Config) -> Self {
        match &config.replicaof {
            Some(primary) => Role::Replica(Replica::new(primary.clone(), config.port)),
            None => Role::Primary(Primary::new(generate_replication_id())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Primary(_) => "master",
            Role::Replica(_) => "slave",
        }
    }

    pub async fn replication_id(&self) -> String {
        match self {
            Role::Primary(primary) => primary.replication_id().to_string(),
            Role::Replica(replica) => replica.replication_id().await,
        }
    }

    pub async fn offset(&self) -> i64 {
        match self {
            Role::Primary(primary) => primary.offset().await as i64,
            Role::Replica(replica) => replica.offset(),
        }
    }

    /// Body of `INFO replication`.
    pub async fn info(&self) -> String {
        let mut lines = vec![
            format!("role:{}", self.name()),
            format!("master_replid:{}", self.replication_id().await),
            format!("master_repl_offset:{}", self.offset().await),
        ];
        if let Role::Primary(primary) = self {
            lines.push(format!("connected_slaves:{}", primary.replica_count().await));
        }
        lines.join("\r\n")
    }
}

/// 40 lowercase hex characters, different on every start.
pub fn generate_replication_id() -> String {
    let state = RandomState::new();
    let mut id = String::with_capacity(40);
    let mut round = 0u64;
    while id.len() < 40 {
        let mut hasher = state.build_hasher();
        hasher.write_u64(round);
        let _ = write!(id, "{:016x}", hasher.finish());
        round += 1;
    }
    id.truncate(40);
    id
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn replication_ids_are_hex_and_fresh() {
        let first = generate_replication_id();
        let second = generate_replication_id();
        assert_eq!(first.len(), 40);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn info_for_each_role() {
        let primary = Role::from_config(&Config::parse_from(["rudis"]));
        let info = primary.info().await;
        let lines: Vec<_> = info.split("\r\n").collect();
        assert_eq!(lines[0], "role:master");
        assert!(lines[1].starts_with("master_replid:"));
        assert_eq!(lines[2], "master_repl_offset:0");
        assert_eq!(lines[3], "connected_slaves:0");

        let replica = Role::from_config(&Config::parse_from([
            "rudis",
            "--port",
            "6380",
            "--replicaof",
            "localhost 6379",
        ]));
        assert_eq!(
            replica.info().await,
            "role:slave\r\nmaster_replid:?\r\nmaster_repl_offset:-1"
        );
    }
}
