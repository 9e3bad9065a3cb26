//! I/O requests issued by state machines.

/// What the driver must do before calling `step()` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Write `buffer_set.write_buffer`, then read a single byte.
    ///
    /// Only used for SSL negotiation; pass the byte to
    /// `ConnectionStateMachine::set_ssl_response`.
    WriteAndReadByte,

    /// Read the next message into the buffer set.
    ///
    /// 1. Read the type byte
    /// 2. Read the big-endian length (includes itself)
    /// 3. Read `length - 4` payload bytes into `read_buffer`
    ReadMessage,

    /// Write `buffer_set.write_buffer`, then read the next message.
    WriteAndReadMessage,

    /// The exchange completed successfully.
    Finished,
}
