//! PostgreSQL wire protocol (v3) encoding and decoding.
//!
//! - `backend`: server → client messages (parsing)
//! - `frontend`: client → server messages (encoding)
//! - `codec`: big-endian primitives and the message builder
//! - `types`: shared protocol types

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use backend::RawMessage;
pub use types::{FormatCode, Oid, TransactionStatus};
