use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(name = "rudis", about = "In-memory key-value server speaking RESP")]
pub struct Config {
    /// Directory holding the snapshot file.
    #[arg(long, default_value = ".")]
    pub dir: String,

    /// Snapshot file name inside `dir`.
    #[arg(long, default_value = "dump.rdb")]
    pub dbfilename: String,

    #[arg(short, long, default_value_t = 6379)]
    pub port: u16,

    /// Primary to replicate from, as "<host> <port>".
    #[arg(long)]
    pub replicaof: Option<ReplicaOf>,
}

impl Config {
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }

    /// Value of a CONFIG GET parameter, if it is one we expose.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "dir" => Some(&self.dir),
            "dbfilename" => Some(&self.dbfilename),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaOf {
    pub host: String,
    pub port: u16,
}

impl FromStr for ReplicaOf {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .split_once(' ')
            .or_else(|| s.trim().rsplit_once(':'))
            .ok_or_else(|| format!("expected \"<host> <port>\", got {s:?}"))?;
        let port = port
            .trim()
            .parse()
            .map_err(|_| format!("invalid port {port:?}"))?;
        Ok(Self {
            host: host.trim().to_string(),
            port,
        })
    }
}

impl fmt::Display for ReplicaOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let config = Config::parse_from(["rudis"]);
        assert_eq!(config.port, 6379);
        assert_eq!(config.snapshot_path(), PathBuf::from("./dump.rdb"));
        assert!(config.replicaof.is_none());
    }

    #[test]
    fn parses_replicaof_forms() {
        let config = Config::parse_from(["rudis", "--port", "6380", "--replicaof", "localhost 6379"]);
        assert_eq!(
            config.replicaof,
            Some(ReplicaOf {
                host: "localhost".to_string(),
                port: 6379
            })
        );
        assert_eq!(
            "127.0.0.1:7000".parse::<ReplicaOf>(),
            Ok(ReplicaOf {
                host: "127.0.0.1".to_string(),
                port: 7000
            })
        );
        assert!("nohost".parse::<ReplicaOf>().is_err());
    }

    #[test]
    fn exposes_snapshot_parameters() {
        let config = Config::parse_from(["rudis", "--dir", "/tmp/data", "--dbfilename", "x.rdb"]);
        assert_eq!(config.get("dir"), Some("/tmp/data"));
        assert_eq!(config.get("dbfilename"), Some("x.rdb"));
        assert_eq!(config.get("maxmemory"), None);
    }
}
