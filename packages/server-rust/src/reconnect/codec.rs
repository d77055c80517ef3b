//! Framing of the reconnection control channel.
//!
//! The channel starts with a 16-byte authentication key. Every following
//! frame names a new host controller endpoint:
//!
//! ```text
//! +----------------+------------------+-----------------+
//! | len: u16 (BE)  | host: len bytes  | port: i32 (BE)  |
//! +----------------+------------------+-----------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::ReconnectError;

pub const AUTH_KEY_LEN: usize = 16;
const LEN_PREFIX: usize = 2;
const PORT_LEN: usize = 4;

/// A decoded control channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    AuthKey([u8; AUTH_KEY_LEN]),
    Reconnect { host: String, port: u16 },
}

/// Decodes the authentication key once, then reconnect frames.
#[derive(Debug, Default)]
pub struct ReconnectCodec {
    authenticated: bool,
}

impl ReconnectCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the authentication key has been read.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn frame_len(src: &BytesMut) -> Option<usize> {
        if src.len() < LEN_PREFIX {
            return None;
        }
        let host_len = usize::from(u16::from_be_bytes([src[0], src[1]]));
        Some(LEN_PREFIX + host_len + PORT_LEN)
    }
}

impl Decoder for ReconnectCodec {
    type Item = ControlMessage;
    type Error = ReconnectError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.authenticated {
            if src.len() < AUTH_KEY_LEN {
                return Ok(None);
            }
            let mut key = [0u8; AUTH_KEY_LEN];
            src.copy_to_slice(&mut key);
            self.authenticated = true;
            return Ok(Some(ControlMessage::AuthKey(key)));
        }

        let Some(frame_len) = Self::frame_len(src) else {
            return Ok(None);
        };
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let host_len = frame_len - LEN_PREFIX - PORT_LEN;
        src.advance(LEN_PREFIX);
        let host = src.split_to(host_len);
        let port = src.get_i32();

        let host = String::from_utf8(host.to_vec()).map_err(|_| ReconnectError::InvalidHostName)?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ReconnectError::InvalidPort { port })?;
        Ok(Some(ControlMessage::Reconnect { host, port }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        if src.is_empty() {
            return Ok(None);
        }
        if !self.authenticated {
            return Err(ReconnectError::Auth { received: src.len() });
        }
        Err(ReconnectError::Truncated {
            expected: Self::frame_len(src).unwrap_or(LEN_PREFIX),
            available: src.len(),
        })
    }
}

impl Encoder<ControlMessage> for ReconnectCodec {
    type Error = ReconnectError;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ControlMessage::AuthKey(key) => dst.extend_from_slice(&key),
            ControlMessage::Reconnect { host, port } => {
                let len = u16::try_from(host.len()).map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "host name too long")
                })?;
                dst.reserve(LEN_PREFIX + host.len() + PORT_LEN);
                dst.put_u16(len);
                dst.extend_from_slice(host.as_bytes());
                dst.put_i32(i32::from(port));
            }
        }
        Ok(())
    }
}
