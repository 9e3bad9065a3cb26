//! ErrorResponse and NoticeResponse.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::read_cstr;

/// Field type codes shared by ErrorResponse and NoticeResponse.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
}

fn parse_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut data = payload;

    while let Some((&code, rest)) = data.split_first() {
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let slot = match code {
            field_type::SEVERITY => &mut fields.severity,
            field_type::SEVERITY_NON_LOCALIZED => &mut fields.severity_non_localized,
            field_type::CODE => &mut fields.code,
            field_type::MESSAGE => &mut fields.message,
            field_type::DETAIL => &mut fields.detail,
            field_type::HINT => &mut fields.hint,
            field_type::WHERE => &mut fields.where_,
            field_type::SCHEMA => &mut fields.schema,
            field_type::TABLE => &mut fields.table,
            field_type::COLUMN => &mut fields.column,
            field_type::DATA_TYPE => &mut fields.data_type,
            field_type::CONSTRAINT => &mut fields.constraint,
            field_type::POSITION => {
                fields.position = value.parse().ok();
                continue;
            }
            // File, line, routine and internal-query fields are not kept.
            _ => continue,
        };
        *slot = Some(value.to_string());
    }

    Ok(fields)
}

/// ErrorResponse: the current request failed.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ErrorFields);

impl ErrorResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(Self)
    }

    pub fn into_error(self) -> Error {
        Error::Server(self.0)
    }
}

/// NoticeResponse: a non-fatal warning or informational message.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ErrorFields);

impl NoticeResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        parse_fields(payload).map(Self)
    }
}
