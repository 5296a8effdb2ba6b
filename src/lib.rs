pub mod command;
pub mod config;
pub mod connection;
pub mod data;
pub mod rdb;
pub mod replication;
pub mod resp;
pub mod server;
pub mod store;
pub mod utils;

pub use config::Config;
pub use resp::Resp;
pub use server::Server;
pub use store::{Db, Store};
