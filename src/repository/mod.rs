// src/repository/mod.rs

//! Mirror downloads for native fetch requests
//!
//! This module provides:
//! - A blocking HTTP client that writes downloads atomically
//! - The fetch resolver that maps file names to repositories and mirrors

mod client;
mod fetch;

pub use client::RepositoryClient;
pub use fetch::{
    CachePaths, FetchResolver, MirrorSource, RepositoryMirrors, StaticMirrors, is_database_file,
    join_url,
};
