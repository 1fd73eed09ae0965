//! Shared contract for Nimbus filesystem pipeline stages.
//!
//! A Nimbus mount is a chain of components, each implementing the same
//! [`Component`] trait and forwarding to the next stage: kernel binding at the
//! top, byte/attribute caches in the middle, the cloud storage backend at the
//! bottom. This crate holds everything two neighboring stages need to agree
//! on:
//!
//! - [`Attributes`]: object metadata as served by `get_attr` and listings
//! - [`Component`]: one async method per filesystem operation
//! - [`FsError`]: the error taxonomy, with a distinguished not-found value
//! - [`path`]: normalization helpers for the relative object paths used as
//!   keys throughout the pipeline

pub mod attr;
pub mod component;
pub mod error;
pub mod path;

pub use attr::{AttrFlags, Attributes};
pub use component::{Component, DirPage, Handle};
pub use error::{FsError, FsResult};
