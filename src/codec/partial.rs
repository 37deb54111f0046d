use ntex_bytes::BytesMut;

use crate::frame;

/// Partially loaded header block
#[derive(Debug)]
pub(crate) struct Partial {
    /// Empty frame
    pub(crate) frame: PartialFrame,

    /// Partial header payload
    pub(crate) buf: BytesMut,

    /// Number of CONTINUATION frames received so far
    pub(crate) continuations: usize,
}

#[derive(Debug)]
pub(crate) enum PartialFrame {
    Headers(frame::Headers),
    PushPromise(frame::PushPromise),
}

// ===== impl PartialFrame =====

impl PartialFrame {
    pub(crate) fn stream_id(&self) -> frame::StreamId {
        match self {
            PartialFrame::Headers(f) => f.stream_id(),
            PartialFrame::PushPromise(f) => f.stream_id(),
        }
    }

    pub(crate) fn is_self_dependent(&self) -> bool {
        match self {
            PartialFrame::Headers(f) => f.is_self_dependent(),
            PartialFrame::PushPromise(_) => false,
        }
    }

    pub(crate) fn load_hpack(
        &mut self,
        src: &[u8],
        decoder: &mut hpack::Decoder<'static>,
        max_header_list_size: usize,
    ) -> Result<(), frame::FrameError> {
        match self {
            PartialFrame::Headers(f) => f.load_hpack(src, decoder, max_header_list_size),
            PartialFrame::PushPromise(f) => f.load_hpack(src, decoder, max_header_list_size),
        }
    }
}

impl From<PartialFrame> for frame::Frame {
    fn from(src: PartialFrame) -> Self {
        match src {
            PartialFrame::Headers(f) => f.into(),
            PartialFrame::PushPromise(f) => f.into(),
        }
    }
}
