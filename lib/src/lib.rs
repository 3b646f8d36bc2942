//! Client-side photo pipeline for rental property views.
//!
//! Two cooperating parts:
//!
//! - [`upload`] turns locally selected image files into a validated,
//!   size-bounded and compressed batch with live previews, and ships it to
//!   the remote API as one multipart request.
//! - [`loader`] fetches cheap photo metadata per entity and the expensive
//!   payloads on demand, at most once per photo.
//!
//! Both talk to the remote service through the [`PhotoApi`] trait, with
//! [`HttpPhotoApi`] as the `reqwest` backed implementation.

#[macro_use]
extern crate serde_derive;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod loader;
pub mod session;
pub mod tracing;
pub mod upload;
pub mod util;

pub use client::{HttpPhotoApi, PhotoApi};
pub use config::Config;
pub use error::{Error, ErrorKind, Result, TransportError, ValidationError, ValidationReason};
pub use loader::{Fetch, Gallery, LoadState, PhotoLoader, Target};
pub use session::{Session, StaticSession};
pub use upload::{FilePreview, PreviewStore, SelectedFile, Selection, UploadBatch};

/// Identifier of the entity (property) photos belong to.
pub type EntityId = i64;

/// Server-side photo identifier.
pub type PhotoId = i64;
