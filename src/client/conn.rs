//! Asynchronous PostgreSQL connection.

use tokio::net::TcpStream;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::RowHandler;
use crate::opts::Opts;
use crate::protocol::frontend::write_terminate;
use crate::protocol::types::TransactionStatus;
use crate::state::{
    Action, ConnectionStateMachine, ExecuteStateMachine, PrepareStateMachine, PreparedStatement,
    StateMachine,
};

use super::stream::Stream;

/// Asynchronous PostgreSQL connection.
pub struct Conn {
    stream: Stream,
    buffer_set: BufferSet,
    backend_pid: Option<u32>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
}

impl Conn {
    /// Connect to a PostgreSQL server and complete authentication.
    pub async fn new(opts: Opts) -> Result<Self> {
        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }

        let addr = format!("{}:{}", opts.host, opts.port);
        let tcp = tokio::time::timeout(opts.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout(opts.connect_timeout))??;
        tcp.set_nodelay(true)?;

        Self::new_with_stream(Stream::tcp(tcp), opts).await
    }

    /// Run startup and authentication over an existing stream.
    pub async fn new_with_stream(mut stream: Stream, options: Opts) -> Result<Self> {
        let mut buffer_set = BufferSet::new();
        let mut state_machine = ConnectionStateMachine::new(options);

        loop {
            match state_machine.step(&mut buffer_set)? {
                Action::WriteAndReadByte => {
                    stream.write_all(&buffer_set.write_buffer).await?;
                    stream.flush().await?;
                    let byte = stream.read_u8().await?;
                    state_machine.set_ssl_response(byte);
                }
                Action::ReadMessage => {
                    stream.read_message(&mut buffer_set).await?;
                }
                Action::WriteAndReadMessage => {
                    stream.write_all(&buffer_set.write_buffer).await?;
                    stream.flush().await?;
                    stream.read_message(&mut buffer_set).await?;
                }
                Action::Finished => break,
            }
        }

        let backend_pid = state_machine.backend_pid();
        tracing::debug!(backend_pid, "connection ready");

        Ok(Self {
            stream,
            buffer_set,
            backend_pid,
            server_params: state_machine.take_server_params(),
            transaction_status: state_machine.transaction_status(),
        })
    }

    /// Backend process ID, if the server sent BackendKeyData.
    pub fn backend_pid(&self) -> Option<u32> {
        self.backend_pid
    }

    /// Parameters the server reported during startup.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Drive a state machine to completion.
    async fn drive<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        loop {
            match state_machine.step(&mut self.buffer_set)? {
                Action::WriteAndReadByte => {
                    return Err(Error::Protocol(
                        "Unexpected WriteAndReadByte in query state machine".into(),
                    ));
                }
                Action::ReadMessage => {
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::WriteAndReadMessage => {
                    self.stream.write_all(&self.buffer_set.write_buffer).await?;
                    self.stream.flush().await?;
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::Finished => return Ok(()),
            }
        }
    }

    /// Parse `query` as the unnamed statement and describe it.
    pub async fn prepare(&mut self, query: &str) -> Result<PreparedStatement> {
        let mut state_machine = PrepareStateMachine::new(query);
        self.drive(&mut state_machine).await?;
        self.transaction_status = state_machine.transaction_status();
        Ok(state_machine.take_prepared_statement())
    }

    /// Execute the statement last prepared, streaming its rows into `handler`.
    pub async fn execute<H: RowHandler>(&mut self, handler: &mut H) -> Result<()> {
        let mut state_machine = ExecuteStateMachine::new(handler);
        self.drive(&mut state_machine).await?;
        self.transaction_status = state_machine.transaction_status();
        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(mut self) -> Result<()> {
        self.buffer_set.write_buffer.clear();
        write_terminate(&mut self.buffer_set.write_buffer);
        self.stream.write_all(&self.buffer_set.write_buffer).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
