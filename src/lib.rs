//! Job-pipeline core for a media/video downloader service.
//!
//! A small broker-backed pipeline: `ServerManager` creates `Url` rows and
//! enqueues them, `Worker` drains queues into `WorkerManager`, which locks a
//! row, drives a `Downloader` through an `ExtractorRunner`, uploads the
//! result via `Storage`, and unlocks the row with the outcome. `Retrier`
//! re-enters transiently-failed downloads; `PlaylistLoader` expands an
//! external playlist into deduplicated URLs.
//!
//! # Architecture
//!
//! - [`db`] - database connection and migrations
//! - [`model`] - core domain types (`Url`, `ExternalVideo`, `EventPayload`)
//! - [`queues`] - queue name constants and `:tmp`/`:failed` derivation
//! - [`queue_store`] - the list-based store backing the broker
//! - [`broker`] - send/receive/dead-letter over a `QueueStore`
//! - [`store`] - `Url`/`ExternalVideo` persistence
//! - [`storage`] - blob storage for downloaded artifacts
//! - [`extractor`] - runs the extraction subprocess as an event stream
//! - [`downloader`] - consumes one URL's extractor events and uploads the result
//! - [`oembed`] - oEmbed metadata lookup
//! - [`worker_manager`] - per-payload lock/download/unlock supervision
//! - [`server_manager`] - URL creation and read passthrough
//! - [`retrier`] - dead-letter re-entry for transient failures
//! - [`playlist_loader`] - playlist expansion with dedup
//! - [`worker`] - fans out receive loops across registered queues

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod broker;
pub mod db;
pub mod downloader;
pub mod extractor;
pub mod model;
pub mod oembed;
pub mod playlist_loader;
pub mod queue_store;
pub mod queues;
pub mod retrier;
pub mod server_manager;
pub mod storage;
pub mod store;
pub mod worker;
pub mod worker_manager;

pub use broker::{Broker, BrokerError};
pub use db::Database;
pub use downloader::{DownloadError, Downloader};
pub use extractor::{ExtractorError, ExtractorEvent, ExtractorRunner, SubprocessExtractor};
pub use model::{EventPayload, ExternalVideo, Url, UrlStatus};
pub use oembed::{HttpOEmbedClient, MemoryOEmbedClient, OEmbedClient, OEmbedError};
pub use playlist_loader::{PlaylistLoader, PlaylistLoaderError, PlaylistSource, PlaylistVideo};
pub use queue_store::{QueueStore, QueueStoreError, SqliteQueueStore};
pub use retrier::{Retrier, RetrierError};
pub use server_manager::{ServerManager, ServerManagerError};
pub use storage::{FilesystemStorage, MemoryStorage, Storage, StorageError};
pub use store::{Store, StoreError};
pub use worker::{Handler, Worker, WorkerError};
pub use worker_manager::{WorkerManager, WorkerManagerError};
