//! Domain model for scanned documents.
//!
//! # Responsibility
//! - Define the document aggregate shared by the writer and the reader.
//! - Keep one nested shape as the contract between storage and callers.
//!
//! # Invariants
//! - A document owns all of its children; none outlive it.
//! - Overall summary presence is the only "scanned" discriminator.

pub mod document;
