//! # whitespace-core: shared document model for whitespace
//!
//! - [`delta`]: retain / insert / delete operations in the Quill delta shape
//! - [`buffer`]: [`RichText`], the Yrs-backed buffer that applies operations
//!   and materialises snapshots
//!
//! The collaboration hub stores one [`RichText`] per open room; editors keep
//! their own and exchange [`Delta`]s through the hub.

pub mod buffer;
pub mod delta;

pub use buffer::{BufferError, RichText};
pub use delta::{utf16_len, utf16_slice, Attributes, Delta, DeltaOp};
