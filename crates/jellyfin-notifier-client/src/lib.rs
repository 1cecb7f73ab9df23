//! Jellyfin API client and the refresh flusher driven by the coalescing
//! engine.

mod client;
mod error;
mod flusher;
mod folders;

pub use client::{ClientSettings, JellyfinClient};
pub use error::{JellyfinError, Result};
pub use flusher::JellyfinFlusher;
pub use folders::{
    merge_ids, select_library_ids_by_collection, sort_folders, CollectionSelection,
    LibraryOptions, LibrarySummary, PathInfo, VirtualFolder,
};
