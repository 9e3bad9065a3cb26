//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, ParameterStatus, RawMessage,
    ReadyForQuery, msg_type,
};
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::{Action, StateMachine, log_async_message};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingSslResponse,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// Drives SSL negotiation, the startup packet and authentication up to the
/// first ReadyForQuery.
pub struct ConnectionStateMachine {
    state: ConnectionState,
    options: Opts,
    ssl_response: Option<u8>,
    scram_client: Option<ScramClient>,
    backend_pid: Option<u32>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
}

impl ConnectionStateMachine {
    pub fn new(options: Opts) -> Self {
        Self {
            state: ConnectionState::Initial,
            options,
            ssl_response: None,
            scram_client: None,
            backend_pid: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Record the single-byte answer to the SSLRequest.
    pub fn set_ssl_response(&mut self, byte: u8) {
        self.ssl_response = Some(byte);
    }

    /// Backend process ID from BackendKeyData.
    pub fn backend_pid(&self) -> Option<u32> {
        self.backend_pid
    }

    /// Take the parameters reported during startup (`server_version`, ...).
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn fail(&mut self, err: Error) -> Result<Action> {
        self.state = ConnectionState::Failed;
        Err(err)
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Password required but not provided".into()))
    }

    fn write_startup_message(&self, buffer_set: &mut BufferSet) {
        let mut params: Vec<(&str, &str)> =
            vec![("user", &self.options.user), ("client_encoding", "UTF8")];
        if let Some(db) = &self.options.database {
            params.push(("database", db));
        }
        if let Some(app) = &self.options.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &self.options.params {
            params.push((name, value));
        }

        buffer_set.write_buffer.clear();
        write_startup(&mut buffer_set.write_buffer, &params);
    }

    fn start(&mut self, buffer_set: &mut BufferSet) -> Action {
        match self.options.ssl_mode {
            SslMode::Disable => {
                self.write_startup_message(buffer_set);
                self.state = ConnectionState::WaitingAuth;
                Action::WriteAndReadMessage
            }
            SslMode::Prefer => {
                buffer_set.write_buffer.clear();
                write_ssl_request(&mut buffer_set.write_buffer);
                self.state = ConnectionState::WaitingSslResponse;
                Action::WriteAndReadByte
            }
        }
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.ssl_response.take() {
            Some(b'N') => {
                self.write_startup_message(buffer_set);
                self.state = ConnectionState::WaitingAuth;
                Ok(Action::WriteAndReadMessage)
            }
            Some(b'S') => self.fail(Error::Unsupported(
                "server accepted SSL but this client only speaks plaintext; use sslmode=disable"
                    .into(),
            )),
            Some(other) => self.fail(Error::Protocol(format!(
                "Unexpected SSL response: {}",
                other
            ))),
            None => self.fail(Error::Protocol("SSL response byte was not provided".into())),
        }
    }

    fn handle_auth(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                buffer_set.type_byte as char
            )));
        }
        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;

        match (self.state, auth) {
            (ConnectionState::WaitingAuth | ConnectionState::WaitingAuthResult, AuthenticationMessage::Ok) => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            (ConnectionState::WaitingAuth, AuthenticationMessage::CleartextPassword) => {
                let password = self.password()?.to_string();
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &password);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            (ConnectionState::WaitingAuth, AuthenticationMessage::Md5Password { salt }) => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &hashed);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            (ConnectionState::WaitingAuth, AuthenticationMessage::Sasl { mechanisms }) => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {:?}",
                        mechanisms
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                buffer_set.write_buffer.clear();
                write_sasl_initial_response(
                    &mut buffer_set.write_buffer,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram_client = Some(scram);
                self.state = ConnectionState::SaslInProgress;
                Ok(Action::WriteAndReadMessage)
            }
            (ConnectionState::SaslInProgress, AuthenticationMessage::SaslContinue { data }) => {
                let server_first = simdutf8::basic::from_utf8(data)
                    .map_err(|_| Error::Auth("server-first-message is not UTF-8".into()))?;
                let scram = self
                    .scram_client
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;
                let client_final = scram.process_server_first(server_first)?;
                buffer_set.write_buffer.clear();
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
                Ok(Action::WriteAndReadMessage)
            }
            (ConnectionState::SaslInProgress, AuthenticationMessage::SaslFinal { data }) => {
                let server_final = simdutf8::basic::from_utf8(data)
                    .map_err(|_| Error::Auth("server-final-message is not UTF-8".into()))?;
                self.scram_client
                    .as_ref()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?
                    .verify_server_final(server_final)?;
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            (_, AuthenticationMessage::Unsupported(code)) => Err(Error::Unsupported(format!(
                "authentication method {}",
                code
            ))),
            (state, auth) => Err(Error::Protocol(format!(
                "Unexpected authentication message {:?} in state {:?}",
                auth, state
            ))),
        }
    }

    fn handle_ready(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;

        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                self.backend_pid = Some(BackendKeyData::parse(payload)?.process_id());
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            // Sent when the server does not support a requested minor version or option.
            msg_type::NEGOTIATE_PROTOCOL_VERSION => Ok(Action::ReadMessage),
            other => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                other as char
            ))),
        }
    }
}

impl StateMachine for ConnectionStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            ConnectionState::Initial => return Ok(self.start(buffer_set)),
            ConnectionState::WaitingSslResponse => return self.handle_ssl_response(buffer_set),
            ConnectionState::Ready | ConnectionState::Failed => {
                return Err(Error::Protocol(format!(
                    "step() called in terminal state {:?}",
                    self.state
                )));
            }
            _ => {}
        }

        let type_byte = buffer_set.type_byte;

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            return self.fail(error.into_error());
        }

        if type_byte == msg_type::PARAMETER_STATUS {
            let param = ParameterStatus::parse(&buffer_set.read_buffer)?;
            self.server_params
                .push((param.name.to_string(), param.value.to_string()));
            return Ok(Action::ReadMessage);
        }

        if RawMessage::is_async_type(type_byte) {
            log_async_message(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::ReadMessage);
        }

        let result = match self.state {
            ConnectionState::WaitingAuth
            | ConnectionState::SaslInProgress
            | ConnectionState::WaitingAuthResult => self.handle_auth(buffer_set),
            _ => self.handle_ready(buffer_set),
        };
        if result.is_err() {
            self.state = ConnectionState::Failed;
        }
        result
    }
}
