//! Buffered TCP stream speaking the message framing.

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};

pub struct Stream {
    inner: BufReader<TcpStream>,
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8().await?)
    }

    /// Read one message: type byte, then a length that counts itself, then the payload.
    pub async fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        let mut header = [0u8; 5];
        self.inner.read_exact(&mut header).await?;
        buffer_set.type_byte = header[0];

        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let payload_len = length.checked_sub(4).ok_or_else(|| {
            Error::Protocol(format!(
                "message '{}' has invalid length {}",
                header[0] as char, length
            ))
        })?;

        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len, 0);
        self.inner.read_exact(&mut buffer_set.read_buffer).await?;
        Ok(())
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Ok(self.inner.get_mut().write_all(buf).await?)
    }

    pub async fn flush(&mut self) -> Result<()> {
        Ok(self.inner.get_mut().flush().await?)
    }
}
