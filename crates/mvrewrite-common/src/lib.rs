//! Common error handling for mvrewrite.

#![warn(rustdoc::broken_intra_doc_links)]

pub mod error;

pub use error::{Error, Result};
