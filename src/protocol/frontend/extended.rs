//! Extended query protocol messages.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

/// Write a Parse message. An empty `name` targets the unnamed statement.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// Write a Describe message for a prepared statement.
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'S');
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Bind message with no parameters.
///
/// A single entry in `result_formats` applies to every result column.
pub fn write_bind(buf: &mut Vec<u8>, portal: &str, statement: &str, result_formats: &[FormatCode]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);
    msg.write_i16(0); // parameter format codes
    msg.write_i16(0); // parameter values
    msg.write_i16(result_formats.len() as i16);
    for &format in result_formats {
        msg.write_i16(format as i16);
    }
    msg.finish();
}

/// Write an Execute message; `max_rows == 0` fetches everything.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows as i32);
    msg.finish();
}

/// Write a Sync message, closing the implicit transaction.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}
