pub mod artifacts;
pub mod callchain;
pub mod check;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod host;
pub mod indexer;
pub mod introspect;
pub mod model;
pub mod project;
pub mod render;
pub mod resolve;
pub mod rpc;
pub mod txn;
pub mod util;
pub mod watch;
