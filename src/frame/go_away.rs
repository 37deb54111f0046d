use std::fmt;

use ntex_bytes::{BufMut, Bytes};

use crate::frame::{self, FrameError, Head, Kind, Reason, StreamId};

/// GOAWAY frame
///
/// Carries the highest peer-initiated stream id the sender processed, an
/// error code and opaque debug data. Connection errors put their
/// description into the debug data.
#[derive(Clone, Eq, PartialEq)]
pub struct GoAway {
    last_stream_id: StreamId,
    reason: Reason,
    debug_data: Bytes,
}

impl GoAway {
    pub fn new(reason: Reason) -> Self {
        GoAway {
            reason,
            last_stream_id: StreamId::zero(),
            debug_data: Bytes::new(),
        }
    }

    pub fn set_last_stream_id(mut self, id: StreamId) -> Self {
        self.last_stream_id = id;
        self
    }

    /// Set debug data
    pub fn set_data<T>(mut self, data: T) -> Self
    where
        Bytes: From<T>,
    {
        self.debug_data = data.into();
        self
    }

    pub fn set_reason(mut self, reason: Reason) -> Self {
        self.reason = reason;
        self
    }

    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn data(&self) -> &Bytes {
        &self.debug_data
    }

    /// Debug data if it is valid utf-8
    pub fn debug_str(&self) -> Option<&str> {
        if self.debug_data.is_empty() {
            None
        } else {
            std::str::from_utf8(&self.debug_data).ok()
        }
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<GoAway, FrameError> {
        if !head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }
        if payload.len() < 8 {
            return Err(FrameError::BadFrameSize);
        }

        // reserved bit of the last stream id is ignored
        let (last_stream_id, _) = StreamId::parse(&payload[..4]);
        Ok(GoAway {
            last_stream_id,
            reason: unpack_octets_4!(payload, 4, u32).into(),
            debug_data: Bytes::copy_from_slice(&payload[8..]),
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        log::trace!(
            "encoding GOAWAY; last={:?} reason={:?}",
            self.last_stream_id,
            self.reason
        );
        Head::new(Kind::GoAway, 0, StreamId::zero()).encode(8 + self.debug_data.len(), dst);
        dst.put_u32(self.last_stream_id.into());
        dst.put_u32(self.reason.into());
        dst.put_slice(&self.debug_data);
    }
}

impl From<GoAway> for frame::Frame {
    fn from(src: GoAway) -> Self {
        frame::Frame::GoAway(src)
    }
}

impl fmt::Debug for GoAway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("GoAway");
        builder
            .field("reason", &self.reason)
            .field("last_stream_id", &self.last_stream_id);
        match self.debug_str() {
            Some(s) => builder.field("data", &s),
            None if !self.debug_data.is_empty() => builder.field("data", &self.debug_data),
            None => &mut builder,
        };
        builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use ntex_bytes::BytesMut;

    use super::*;
    use crate::ConnectionError;

    fn decode(buf: &[u8]) -> Result<GoAway, FrameError> {
        let head = Head::parse(&buf[..frame::HEADER_LEN]);
        assert_eq!(head.kind(), Kind::GoAway);
        assert_eq!(Head::parse_len(buf), buf.len() - frame::HEADER_LEN);
        GoAway::load(head, &buf[frame::HEADER_LEN..])
    }

    #[test]
    fn test_connection_error_data() {
        let mut buf = BytesMut::new();
        ConnectionError::WindowValueOverflow
            .to_goaway()
            .set_last_stream_id(7.into())
            .encode(&mut buf);

        let frm = decode(&buf).unwrap();
        assert_eq!(frm.reason(), Reason::FLOW_CONTROL_ERROR);
        assert_eq!(frm.last_stream_id(), 7);
        assert_eq!(frm.debug_str(), Some("window value is overflowed"));
        assert!(format!("{:?}", frm).contains("window value is overflowed"));
    }

    #[test]
    fn test_load() {
        // reserved bit set on the last stream id
        let payload = [0x80, 0, 0, 5, 0, 0, 0, 0, 0xff, 0xfe];
        let frm = GoAway::load(Head::new(Kind::GoAway, 0, StreamId::zero()), &payload).unwrap();
        assert_eq!(frm.last_stream_id(), 5);
        assert_eq!(frm.reason(), Reason::NO_ERROR);
        assert_eq!(&frm.data()[..], &[0xff, 0xfe]);
        assert_eq!(frm.debug_str(), None);

        assert_eq!(
            GoAway::load(Head::new(Kind::GoAway, 0, 1.into()), &payload),
            Err(FrameError::InvalidStreamId)
        );
        assert_eq!(
            GoAway::load(Head::new(Kind::GoAway, 0, StreamId::zero()), &payload[..6]),
            Err(FrameError::BadFrameSize)
        );
    }

    #[test]
    fn test_no_data() {
        let mut buf = BytesMut::new();
        GoAway::new(Reason::NO_ERROR).encode(&mut buf);
        assert_eq!(buf.len(), frame::HEADER_LEN + 8);
        let frm = decode(&buf).unwrap();
        assert!(frm.data().is_empty());
        assert_eq!(frm.last_stream_id(), 0);
    }
}
