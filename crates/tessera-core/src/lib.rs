//! Core types for the Tessera tensor memory subsystem.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by the arena and cache crates: element data
//! types, shapes, memory kinds, identifiers and the error taxonomy.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod dtype;
pub mod error;
pub mod id;
pub mod kind;
pub mod shape;

pub use dtype::DataType;
pub use error::MemError;
pub use id::{ArrayId, RecordId, WorkspaceId};
pub use kind::MemoryKind;
pub use shape::Shape;
