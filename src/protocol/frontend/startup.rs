//! Session start and end messages.

use crate::protocol::codec::MessageBuilder;

/// Protocol version 3.0
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// SSLRequest code
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Write an SSLRequest. The server answers with a single byte, `S` or `N`.
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::untyped(buf);
    msg.write_i32(SSL_REQUEST_CODE);
    msg.finish();
}

/// Write a StartupMessage carrying `(name, value)` parameters; `user` is required.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::untyped(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish();
}

/// Write a Terminate message.
pub fn write_terminate(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::TERMINATE).finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_request_layout() {
        let mut buf = Vec::new();
        write_ssl_request(&mut buf);
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &8_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &SSL_REQUEST_CODE.to_be_bytes());
    }

    #[test]
    fn startup_layout() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "dev"), ("database", "dev")]);

        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], &PROTOCOL_VERSION_3_0.to_be_bytes());
        assert_eq!(&buf[8..], b"user\0dev\0database\0dev\0\0");
    }

    #[test]
    fn terminate_layout() {
        let mut buf = Vec::new();
        write_terminate(&mut buf);
        assert_eq!(buf, vec![b'X', 0, 0, 0, 4]);
    }
}
