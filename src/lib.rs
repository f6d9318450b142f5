#![warn(missing_docs)]
//! # memkv
//! An in-memory key-value store with typed values (strings, doubly-linked
//! lists, sorted sets), incremental hash-table rehashing, JSON snapshot
//! persistence, and a textual command parser with glob-style key matching.
//!
//! All mutations run on one dedicated worker thread: callers enqueue typed
//! [`Request`]s (built programmatically or parsed from a command line) and
//! block for the matching [`Reply`]. The worker interleaves one hash-table
//! maintenance step between request batches, so no single command ever pays
//! for a full table resize.
//!
//! ```no_run
//! use memkv::{Config, Db, Reply};
//!
//! # fn main() -> memkv::Result<()> {
//! let mut db = Db::start(Config::default())?;
//! db.command("RPUSH list1 a b c");
//! assert_eq!(db.command("LLEN list1"), Reply::UInt(3));
//! db.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod glob;
pub mod hash;
pub mod list;
pub mod parser;
pub mod protocol;
pub mod store;
pub mod table;
pub mod worker;
pub mod zset;

pub use config::Config;
pub use error::{DbError, Result};
pub use parser::parse_command;
pub use protocol::{Action, Arg, Reply, Request};
pub use store::Store;
pub use worker::Db;
