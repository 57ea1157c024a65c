//! Content indexing for a single shared directory.
//!
//! Files are fingerprinted with SHA-256 by a pluggable [`Hasher`], fanned out
//! over a bounded worker pool by the [`Indexer`], and published as an
//! immutable [`Index`] snapshot owned by a [`ContentIndex`].

pub mod error;
pub mod fingerprint;
pub mod hasher;
pub mod index;
pub mod indexer;

pub use error::IndexError;
pub use fingerprint::{fingerprint_bytes, Fingerprint, FingerprintError};
pub use hasher::{Hasher, Sha256Hasher};
pub use index::{ContentIndex, FileRecord, Index};
pub use indexer::{IndexReport, Indexer};
