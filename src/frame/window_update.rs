use ntex_bytes::BufMut;

use crate::frame::{self, FrameError, Head, Kind, StreamId, WindowSize};

const RESERVED_BIT: u32 = 1 << 31;

/// WINDOW_UPDATE frame
///
/// Stream id zero targets the connection window. A zero increment is
/// loaded as is, the session turns it into a stream or connection error.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WindowUpdate {
    stream_id: StreamId,
    increment: WindowSize,
}

impl WindowUpdate {
    pub fn new(stream_id: StreamId, increment: WindowSize) -> WindowUpdate {
        WindowUpdate {
            stream_id,
            increment,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn size_increment(&self) -> WindowSize {
        self.increment
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<WindowUpdate, FrameError> {
        debug_assert_eq!(head.kind(), Kind::WindowUpdate);
        if payload.len() != 4 {
            return Err(FrameError::BadFrameSize);
        }

        Ok(WindowUpdate {
            stream_id: head.stream_id(),
            increment: unpack_octets_4!(payload, 0, u32) & !RESERVED_BIT,
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        log::trace!("encoding WINDOW_UPDATE; id={:?} inc={}", self.stream_id, self.increment);
        Head::new(Kind::WindowUpdate, 0, self.stream_id).encode(4, dst);
        dst.put_u32(self.increment & !RESERVED_BIT);
    }
}

impl From<WindowUpdate> for frame::Frame {
    fn from(src: WindowUpdate) -> Self {
        frame::Frame::WindowUpdate(src)
    }
}

#[cfg(test)]
mod tests {
    use ntex_bytes::BytesMut;

    use super::*;

    #[test]
    fn test_connection_update() {
        let mut buf = BytesMut::new();
        WindowUpdate::new(StreamId::CON, 1 << 20).encode(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 4, 0x8, 0, 0, 0, 0, 0, 0, 0x10, 0, 0][..]);

        let head = Head::parse(&buf[..frame::HEADER_LEN]);
        let frm = WindowUpdate::load(head, &buf[frame::HEADER_LEN..]).unwrap();
        assert!(frm.stream_id().is_zero());
        assert_eq!(frm.size_increment(), 1 << 20);
    }

    #[test]
    fn test_load() {
        let head = Head::new(Kind::WindowUpdate, 0, 3.into());

        // reserved bit is ignored
        let frm = WindowUpdate::load(head, &[0x80, 0, 0, 10]).unwrap();
        assert_eq!(frm.stream_id(), 3);
        assert_eq!(frm.size_increment(), 10);

        let frm = WindowUpdate::load(head, &[0, 0, 0, 0]).unwrap();
        assert_eq!(frm.size_increment(), 0);

        assert_eq!(
            WindowUpdate::load(head, &[0, 0, 10]),
            Err(FrameError::BadFrameSize)
        );
    }
}
