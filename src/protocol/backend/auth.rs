//! Startup and authentication messages.

use zerocopy::byteorder::big_endian::U32 as U32BE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_i32};
use crate::protocol::types::TransactionStatus;

/// Authentication request codes.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication request from the server.
#[derive(Debug)]
pub enum AuthenticationMessage<'a> {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    /// SASL with the server's mechanism list
    Sasl { mechanisms: Vec<&'a str> },
    /// SCRAM server-first-message
    SaslContinue { data: &'a [u8] },
    /// SCRAM server-final-message
    SaslFinal { data: &'a [u8] },
    /// A method this client does not implement (Kerberos, GSS, SSPI)
    Unsupported(i32),
}

impl<'a> AuthenticationMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;

        Ok(match code {
            auth_type::OK => Self::Ok,
            auth_type::CLEARTEXT_PASSWORD => Self::CleartextPassword,
            auth_type::MD5_PASSWORD => {
                let salt = rest
                    .first_chunk::<4>()
                    .copied()
                    .ok_or_else(|| Error::Protocol("MD5Password: missing salt".into()))?;
                Self::Md5Password { salt }
            }
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                while data.first().is_some_and(|&b| b != 0) {
                    let (mechanism, remaining) = read_cstr(data)?;
                    mechanisms.push(mechanism);
                    data = remaining;
                }
                Self::Sasl { mechanisms }
            }
            auth_type::SASL_CONTINUE => Self::SaslContinue { data: rest },
            auth_type::SASL_FINAL => Self::SaslFinal { data: rest },
            auth_type::KERBEROS_V5 | auth_type::GSS | auth_type::SSPI => Self::Unsupported(code),
            _ => {
                return Err(Error::Protocol(format!(
                    "Unknown authentication type: {}",
                    code
                )));
            }
        })
    }
}

/// BackendKeyData: process ID and secret key used for cancel requests.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    pub pid: U32BE,
    pub secret_key: U32BE,
}

impl BackendKeyData {
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        // Protocol 3.2 allows longer keys; only the leading 8 bytes are kept.
        let (key, _) = Self::ref_from_prefix(payload)
            .map_err(|e| Error::Protocol(format!("BackendKeyData: {e:?}")))?;
        Ok(key)
    }

    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }
}

/// ParameterStatus: a server run-time parameter and its value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery: the server finished the current request cycle.
#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    pub status: u8,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        match payload {
            [status] => Ok(Self { status: *status }),
            _ => Err(Error::Protocol(format!(
                "ReadyForQuery: expected 1 byte, got {}",
                payload.len()
            ))),
        }
    }

    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_byte(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sasl_mechanisms() {
        let mut payload = 10_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        match AuthenticationMessage::parse(&payload).unwrap() {
            AuthenticationMessage::Sasl { mechanisms } => {
                assert_eq!(mechanisms, vec!["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_md5_salt() {
        let mut payload = 5_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[1, 2, 3, 4]);
        assert!(matches!(
            AuthenticationMessage::parse(&payload).unwrap(),
            AuthenticationMessage::Md5Password { salt: [1, 2, 3, 4] }
        ));
        assert!(AuthenticationMessage::parse(&5_i32.to_be_bytes()).is_err());
    }

    #[test]
    fn parse_backend_key_and_ready() {
        let payload = [0, 0, 0, 42, 0, 0, 0, 7];
        assert_eq!(BackendKeyData::parse(&payload).unwrap().process_id(), 42);

        let ready = ReadyForQuery::parse(b"I").unwrap();
        assert_eq!(ready.transaction_status(), Some(TransactionStatus::Idle));
        assert!(ReadyForQuery::parse(b"").is_err());
    }
}
