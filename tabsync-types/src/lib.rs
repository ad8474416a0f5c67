//! Core type definitions for TabSync.
//!
//! This crate defines the small, dependency-light types shared by every other
//! TabSync crate:
//! - Device and context-instance identifiers (UUID-backed)
//! - Opaque remote-document identifiers and revision fingerprints
//! - A zeroizing secret wrapper for tokens and passwords
//!
//! Everything domain-specific (envelopes, sync state, remote wire shapes)
//! lives in the crates that own it, not here.

mod document;
mod ids;
mod secret;

pub use document::{DocumentId, Revision};
pub use ids::{DeviceId, InstanceId};
pub use secret::SecretString;
