// src/alpm/mod.rs

//! libalpm bindings
//!
//! The library is loaded at runtime (see [`ffi::api`]), so shelly builds
//! and its tests run on systems without libalpm installed.

mod callbacks;
pub mod ffi;
mod handle;
pub mod list;
mod package;

pub use handle::{AlpmConnector, Handle, NativeMirrors};
pub use package::PackageHandle;
