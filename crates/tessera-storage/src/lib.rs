// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Tessera memory engine.
//!
//! Provides WAL-mode SQLite storage with embedded migrations and a
//! single-writer concurrency model via `tokio-rusqlite`. Every logical
//! operation runs as one closure inside one SQLite transaction.

pub mod adapter;
pub mod codec;
pub mod database;
pub mod migrations;

pub use adapter::{SqliteStorage, StorageStats};
pub use database::{map_tr_err, Database, TxError};
