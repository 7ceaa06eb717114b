//! Keeps a HydroShare resource and its local working copy in sync.
//!
//! The remote store only exposes a flat listing of object URLs while the
//! local copy is an ordinary directory tree. [`fs`] turns both into the same
//! [`fs::TreeNode`] shape, [`resource::Resource`] mutates either side and
//! [`transfer`] moves and copies between them. [`registry`] and [`api`] sit on
//! top for listing, creating and addressing resources by id.

pub mod api;
pub mod config;
pub mod error;
pub mod fs;
pub mod logging;
pub mod path;
pub mod registry;
pub mod remote;
pub mod resource;
pub mod transfer;

pub use error::{AppError, ErrorKind, Result};
pub use path::{Origin, StorePath};
