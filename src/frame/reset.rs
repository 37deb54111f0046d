use ntex_bytes::BufMut;

use crate::frame::{Frame, FrameError, Head, Kind, Reason, StreamId};

/// RST_STREAM frame
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Reset {
    stream_id: StreamId,
    reason: Reason,
}

impl Reset {
    pub fn new(stream_id: StreamId, reason: Reason) -> Reset {
        Reset { stream_id, reason }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Reset, FrameError> {
        if head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        if payload.len() != 4 {
            return Err(FrameError::InvalidPayloadLength);
        }

        Ok(Reset {
            stream_id: head.stream_id(),
            reason: unpack_octets_4!(payload, 0, u32).into(),
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        log::trace!("encoding RESET; id={:?} code={:?}", self.stream_id, self.reason);

        Head::new(Kind::Reset, 0, self.stream_id).encode(4, dst);
        dst.put_u32(self.reason.into());
    }
}

impl From<Reset> for Frame {
    fn from(src: Reset) -> Self {
        Frame::Reset(src)
    }
}
