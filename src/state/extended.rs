//! Extended query protocol state machines.
//!
//! A query runs as two round trips on the unnamed statement and portal:
//! Parse + Describe + Sync to learn the result columns, then
//! Bind + Execute + Sync to stream the rows.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::RowHandler;
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, ParameterDescription, RawMessage, ReadyForQuery,
    RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_describe_statement, write_execute, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, Oid, TransactionStatus};

use super::{Action, StateMachine, log_async_message};

/// Extended query state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingParse,
    WaitingParamDesc,
    WaitingRowDesc,
    WaitingBind,
    ProcessingRows,
    WaitingReady,
    Finished,
}

/// A statement parsed by the server.
#[derive(Debug, Clone, Default)]
pub struct PreparedStatement {
    /// Parameter type OIDs
    pub param_oids: Vec<Oid>,
    /// Raw RowDescription payload; `None` when the statement returns no rows
    row_description: Option<Vec<u8>>,
}

impl PreparedStatement {
    /// Column names in result order. Empty for statements without a result set.
    pub fn column_names(&self) -> Result<Vec<String>> {
        let Some(payload) = &self.row_description else {
            return Ok(Vec::new());
        };
        let description = RowDescription::parse(payload)?;
        Ok(description
            .fields()
            .iter()
            .map(|field| field.name.to_string())
            .collect())
    }
}

/// Parse + Describe statement + Sync.
pub struct PrepareStateMachine<'q> {
    state: State,
    query: &'q str,
    prepared: PreparedStatement,
    pending_error: Option<Error>,
    transaction_status: TransactionStatus,
}

impl<'q> PrepareStateMachine<'q> {
    pub fn new(query: &'q str) -> Self {
        Self {
            state: State::Initial,
            query,
            prepared: PreparedStatement::default(),
            pending_error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Take the prepared statement (after prepare completes).
    pub fn take_prepared_statement(&mut self) -> PreparedStatement {
        std::mem::take(&mut self.prepared)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn handle_parse(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::PARSE_COMPLETE => {
                self.state = State::WaitingParamDesc;
                Ok(Action::ReadMessage)
            }
            other => Err(unexpected("ParseComplete", other)),
        }
    }

    fn handle_param_desc(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::PARAMETER_DESCRIPTION => {
                let desc = ParameterDescription::parse(&buffer_set.read_buffer)?;
                self.prepared.param_oids = desc.oids().to_vec();
                self.state = State::WaitingRowDesc;
                Ok(Action::ReadMessage)
            }
            other => Err(unexpected("ParameterDescription", other)),
        }
    }

    fn handle_row_desc(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION => {
                // Decoded by `column_names`, so a malformed description
                // surfaces there rather than failing the prepare.
                self.prepared.row_description = Some(buffer_set.read_buffer.clone());
            }
            msg_type::NO_DATA => {
                self.prepared.row_description = None;
            }
            other => return Err(unexpected("RowDescription or NoData", other)),
        }
        self.state = State::WaitingReady;
        Ok(Action::ReadMessage)
    }
}

impl StateMachine for PrepareStateMachine<'_> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            buffer_set.write_buffer.clear();
            write_parse(&mut buffer_set.write_buffer, "", self.query, &[]);
            write_describe_statement(&mut buffer_set.write_buffer, "");
            write_sync(&mut buffer_set.write_buffer);
            self.state = State::WaitingParse;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;
        if RawMessage::is_async_type(type_byte) {
            log_async_message(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::ReadMessage);
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            // The server discards everything up to Sync, then reports ReadyForQuery.
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            self.pending_error = Some(error.into_error());
            self.state = State::WaitingReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            State::WaitingParse => self.handle_parse(buffer_set),
            State::WaitingParamDesc => self.handle_param_desc(buffer_set),
            State::WaitingRowDesc => self.handle_row_desc(buffer_set),
            State::WaitingReady => {
                let status = wait_ready(buffer_set, self.pending_error.is_some())?;
                let Some(status) = status else {
                    return Ok(Action::ReadMessage);
                };
                self.transaction_status = status;
                self.state = State::Finished;
                match self.pending_error.take() {
                    Some(err) => Err(err),
                    None => Ok(Action::Finished),
                }
            }
            state => Err(Error::Protocol(format!("Unexpected state {:?}", state))),
        }
    }
}

/// Bind + Execute + Sync on the unnamed statement, streaming rows to a handler.
///
/// Every result column is requested in text format.
pub struct ExecuteStateMachine<'h, H> {
    state: State,
    handler: &'h mut H,
    pending_error: Option<Error>,
    transaction_status: TransactionStatus,
}

impl<'h, H: RowHandler> ExecuteStateMachine<'h, H> {
    pub fn new(handler: &'h mut H) -> Self {
        Self {
            state: State::Initial,
            handler,
            pending_error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn handle_bind(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::BIND_COMPLETE => {
                self.state = State::ProcessingRows;
                Ok(Action::ReadMessage)
            }
            other => Err(unexpected("BindComplete", other)),
        }
    }

    fn handle_rows(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::DATA_ROW => {
                let row = DataRow::parse(&buffer_set.read_buffer)?;
                if let Err(err) = self.handler.row(row) {
                    // Keep reading so the session stays in sync; report at ReadyForQuery.
                    self.pending_error = Some(err);
                    self.state = State::WaitingReady;
                }
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                self.handler.result_end(complete)?;
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE | msg_type::PORTAL_SUSPENDED => {
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(unexpected("DataRow or CommandComplete", other)),
        }
    }
}

impl<H: RowHandler> StateMachine for ExecuteStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            buffer_set.write_buffer.clear();
            write_bind(&mut buffer_set.write_buffer, "", "", &[FormatCode::Text]);
            write_execute(&mut buffer_set.write_buffer, "", 0);
            write_sync(&mut buffer_set.write_buffer);
            self.state = State::WaitingBind;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;
        if RawMessage::is_async_type(type_byte) {
            log_async_message(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::ReadMessage);
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            // A handler failure seen first stays the reported error.
            self.pending_error.get_or_insert(error.into_error());
            self.state = State::WaitingReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            State::WaitingBind => self.handle_bind(buffer_set),
            State::ProcessingRows => self.handle_rows(buffer_set),
            State::WaitingReady => {
                let status = wait_ready(buffer_set, self.pending_error.is_some())?;
                let Some(status) = status else {
                    return Ok(Action::ReadMessage);
                };
                self.transaction_status = status;
                self.state = State::Finished;
                match self.pending_error.take() {
                    Some(err) => Err(err),
                    None => Ok(Action::Finished),
                }
            }
            state => Err(Error::Protocol(format!("Unexpected state {:?}", state))),
        }
    }
}

/// Wait for ReadyForQuery. While `draining`, anything else is skipped.
fn wait_ready(buffer_set: &BufferSet, draining: bool) -> Result<Option<TransactionStatus>> {
    match buffer_set.type_byte {
        msg_type::READY_FOR_QUERY => {
            let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
            Ok(Some(ready.transaction_status().unwrap_or_default()))
        }
        _ if draining => Ok(None),
        other => Err(unexpected("ReadyForQuery", other)),
    }
}

fn unexpected(expected: &str, got: u8) -> Error {
    Error::Protocol(format!("Expected {}, got '{}'", expected, got as char))
}
