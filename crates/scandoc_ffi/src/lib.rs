//! Flutter bridge crate for the scanned document core.

pub mod api;
