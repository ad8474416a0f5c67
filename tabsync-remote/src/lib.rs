//! Remote document store for TabSync.
//!
//! Talks to a gist-style HTTP API and exposes the [`DocumentStore`]
//! abstraction the sync engine is written against. One private document
//! per account holds the encrypted snapshot; its opaque revision string
//! is what optimistic concurrency compares.

mod client;
mod error;
mod store;

pub use client::{GistApi, GistDocument, GistFile, GistRevision, RemoteIdentity};
pub use error::{StoreError, StoreResult};
pub use store::{mock, DocumentRef, DocumentStore, GistStore, RemoteDocument, StoreConfig};
