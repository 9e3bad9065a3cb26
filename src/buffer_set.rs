//! Buffers shared between a connection and its state machines.

/// Read/write buffers for one connection.
///
/// State machines encode outgoing messages into `write_buffer`; the driver
/// reads each incoming message's payload into `read_buffer` and records its
/// type byte.
pub struct BufferSet {
    /// Payload of the last message read (without type byte and length)
    pub read_buffer: Vec<u8>,
    /// Outgoing messages
    pub write_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(1024),
            type_byte: 0,
        }
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
