//! shardcast: deliver multi-gigabyte ML model artifacts over CDNs that
//! cap individual objects at a few dozen megabytes.
//!
//! Artifacts are pre-split at packaging time into offset-indexed shards
//! described by a filemap. At runtime a resolver intercepts byte-level
//! reads, reassembles logical files from shards on demand (including
//! ranged reads), deduplicates concurrent shard fetches, caches shards on
//! disk, and reports monotonic, manifest-scoped progress.
//!
//! The main entry points:
//!
//! - [`packager::pack`]: artifacts in, shard directory + `filemap.json` out
//! - [`resolver::Resolver`]: request interception, direct resolve, progress
//! - [`downloader::Downloader`]: bulk pull of manifests to a directory

pub mod downloader;
pub mod filemap;
pub mod gguf;
pub mod hash;
pub mod packager;
pub mod progress;
pub mod reassemble;
pub mod resolver;
pub mod source;
pub mod store;

pub use filemap::{Filemap, FilemapError, FilemapLoader, FILEMAP_VERSION};
pub use progress::{ProgressEvent, ProgressMode};
pub use reassemble::{Body, Response};
pub use resolver::{Gateway, Resolver, SourceSpec};
pub use source::SourceBase;
pub use store::{CacheLayout, ShardStore, StoreError, DEFAULT_CACHE_DIR};
