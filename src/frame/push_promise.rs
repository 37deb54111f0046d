use std::fmt;

use ntex_bytes::{Bytes, BytesMut};
use ntex_http::HeaderMap;

use super::headers::{HeaderBlock, END_HEADERS, PADDED};
use super::{util, Frame, FrameError, Head, Kind, PseudoHeaders, StreamId};

/// PUSH_PROMISE frame
///
/// Sent by the server on an open client stream to reserve a new stream
/// for a pushed response. The promised request is carried in the header
/// block.
#[derive(Clone)]
pub struct PushPromise {
    /// The ID of the stream with which this frame is associated.
    stream_id: StreamId,

    /// The ID of the stream being reserved by this PushPromise.
    promised_id: StreamId,

    /// The header block fragment
    header_block: HeaderBlock,

    /// The associated flags
    flags: PushPromiseFlag,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PushPromiseFlag(u8);

impl PushPromise {
    pub fn new(
        stream_id: StreamId,
        promised_id: StreamId,
        pseudo: PseudoHeaders,
        fields: HeaderMap,
    ) -> Self {
        PushPromise {
            flags: PushPromiseFlag::default(),
            header_block: HeaderBlock { fields, pseudo },
            promised_id,
            stream_id,
        }
    }

    /// Loads the push promise frame but doesn't actually do HPACK decoding.
    pub fn load(head: Head, mut src: Bytes) -> Result<(Self, Bytes), FrameError> {
        let flags = PushPromiseFlag(head.flag());

        if head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }

        if flags.is_padded() {
            util::strip_padding(&mut src)?;
        }

        if src.len() < 4 {
            return Err(FrameError::MalformedMessage);
        }

        let (promised_id, _) = StreamId::parse(&src[..4]);
        // Drop promised_id bytes
        let _ = src.split_to(4);

        // A receiver MUST treat the receipt of a PUSH_PROMISE that promises an
        // illegal stream identifier as a connection error of type
        // PROTOCOL_ERROR.
        if !promised_id.is_server_initiated() {
            return Err(FrameError::InvalidStreamId);
        }

        let frame = PushPromise {
            flags,
            promised_id,
            header_block: HeaderBlock::default(),
            stream_id: head.stream_id(),
        };
        Ok((frame, src))
    }

    pub fn load_hpack(
        &mut self,
        src: &[u8],
        decoder: &mut hpack::Decoder<'static>,
        max_list_size: usize,
    ) -> Result<(), FrameError> {
        self.header_block = HeaderBlock::load(self.promised_id, src, decoder, max_list_size)?;
        Ok(())
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn promised_id(&self) -> StreamId {
        self.promised_id
    }

    pub(crate) fn set_promised_id(&mut self, id: StreamId) {
        self.promised_id = id;
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags.is_end_headers()
    }

    pub fn pseudo(&self) -> &PseudoHeaders {
        &self.header_block.pseudo
    }

    pub fn fields(&self) -> &HeaderMap {
        &self.header_block.fields
    }

    pub fn into_parts(self) -> (PseudoHeaders, HeaderMap) {
        (self.header_block.pseudo, self.header_block.fields)
    }

    pub fn encode(
        self,
        encoder: &mut hpack::Encoder<'static>,
        dst: &mut BytesMut,
        max_size: usize,
    ) {
        let head = Head::new(Kind::PushPromise, self.flags.into(), self.stream_id);
        self.header_block
            .encode(encoder, &head, Some(self.promised_id), dst, max_size);
    }
}

impl From<PushPromise> for Frame {
    fn from(src: PushPromise) -> Self {
        Frame::PushPromise(src)
    }
}

impl fmt::Debug for PushPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushPromise")
            .field("stream_id", &self.stream_id)
            .field("promised_id", &self.promised_id)
            .field("flags", &self.flags)
            .field("pseudo", &self.header_block.pseudo)
            .finish()
    }
}

// ===== impl PushPromiseFlag =====

impl PushPromiseFlag {
    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS == END_HEADERS
    }

    pub fn is_padded(&self) -> bool {
        self.0 & PADDED == PADDED
    }
}

impl Default for PushPromiseFlag {
    /// Returns a `PushPromiseFlag` value with `END_HEADERS` set.
    fn default() -> Self {
        PushPromiseFlag(END_HEADERS)
    }
}

impl From<PushPromiseFlag> for u8 {
    fn from(src: PushPromiseFlag) -> u8 {
        src.0
    }
}

impl fmt::Debug for PushPromiseFlag {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        util::debug_flags(fmt, self.0)
            .flag_if(self.is_end_headers(), "END_HEADERS")
            .flag_if(self.is_padded(), "PADDED")
            .finish()
    }
}
