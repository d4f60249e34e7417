//! Asynchronous result retrieval
//!
//! This module handles:
//! * Operation handles keyed by message id (fetch, abandon, drain)
//! * Message entities wrapping one fetch worth of responses
//! * Per-operation progress tracking

mod message;
mod operation;
mod state;

pub use message::{Message, MessageKind};
pub use operation::{Operation, OperationKind};
pub use state::OperationState;
