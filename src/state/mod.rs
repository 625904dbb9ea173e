//! Local store: the SQLite index shared by every sync stage.
//!
//! Tracks each remote media item with its resolved local path and download
//! state, album membership, and the incremental scan checkpoint. It is the
//! only channel between the indexer, the downloader and the album linker.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{LocalStore, SqliteStore};
pub use error::StateError;
pub use types::{AlbumFileEntry, AlbumRecord, MediaRecord, SearchFilter, StoreSummary};
