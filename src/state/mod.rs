//! Sans-I/O state machines for the PostgreSQL protocol.
//!
//! A state machine never touches the socket. Each call to
//! [`StateMachine::step`] consumes the message the driver last read into the
//! [`BufferSet`] (if any), possibly encodes outgoing messages into the write
//! buffer, and returns the [`Action`] the driver must perform next.

pub mod action;
pub mod connection;
pub mod extended;

pub use action::Action;
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use extended::{ExecuteStateMachine, PrepareStateMachine, PreparedStatement};

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::backend::{NoticeResponse, ParameterStatus, msg_type};

/// A protocol exchange driven by a connection.
pub trait StateMachine {
    /// Advance the exchange after the previous action has been performed.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;
}

/// Log a message the server may send at any time and let the exchange continue.
fn log_async_message(type_byte: u8, payload: &[u8]) -> Result<()> {
    match type_byte {
        msg_type::NOTICE_RESPONSE => {
            let notice = NoticeResponse::parse(payload)?;
            tracing::debug!(notice = %notice.0, "server notice");
        }
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(payload)?;
            tracing::debug!(name = param.name, value = param.value, "parameter status");
        }
        _ => tracing::debug!("ignoring asynchronous notification"),
    }
    Ok(())
}
