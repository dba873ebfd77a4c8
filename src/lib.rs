pub mod bloom;
pub mod config;
pub mod encoding;
pub mod error;
pub mod hasher;
pub mod ledger;
pub mod runner;
pub mod store;
pub mod tictac;

pub use config::QueryConfig;
pub use error::{Error, Result};
pub use hasher::{HashPair, Hasher};
pub use ledger::{LedgerKey, LedgerValue, Tag, Timestamp};
pub use runner::{QueryRunner, Runner};
pub use store::memory::MemoryStore;
pub use tictac::{TicTacTree, TreeSize};
