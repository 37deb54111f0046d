use ntex_bytes::BufMut;

use crate::frame::{Frame, FrameError, Head, Kind, StreamId};

const ACK_FLAG: u8 = 0x1;

pub(super) type Payload = [u8; 8];

/// PING frame, a keepalive request or its acknowledgement
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ping {
    ack: bool,
    payload: Payload,
}

impl Ping {
    pub fn new(payload: Payload) -> Ping {
        Ping {
            ack: false,
            payload,
        }
    }

    /// Acknowledgement echoing `payload`
    pub fn pong(payload: Payload) -> Ping {
        Ping { ack: true, payload }
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn load(head: Head, bytes: &[u8]) -> Result<Ping, FrameError> {
        debug_assert_eq!(head.kind(), Kind::Ping);

        // connection level frame with exactly 8 octets of opaque data
        if !head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        let payload: Payload = bytes.try_into().map_err(|_| FrameError::BadFrameSize)?;

        Ok(Ping {
            ack: head.flag() & ACK_FLAG != 0,
            payload,
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        log::trace!("encoding PING; ack={} payload={:?}", self.ack, self.payload);

        let flags = if self.ack { ACK_FLAG } else { 0 };
        Head::new(Kind::Ping, flags, StreamId::zero()).encode(self.payload.len(), dst);
        dst.put_slice(&self.payload);
    }
}

impl From<Ping> for Frame {
    fn from(src: Ping) -> Frame {
        Frame::Ping(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        let head = Head::new(Kind::Ping, ACK_FLAG, StreamId::zero());
        let ping = Ping::load(head, b"12345678").unwrap();
        assert!(ping.is_ack());
        assert_eq!(ping.payload(), b"12345678");

        assert_eq!(
            Ping::load(Head::new(Kind::Ping, 0, StreamId::zero()), b"1234"),
            Err(FrameError::BadFrameSize)
        );
        assert_eq!(
            Ping::load(Head::new(Kind::Ping, 0, 1.into()), b"12345678"),
            Err(FrameError::InvalidStreamId)
        );
    }
}
