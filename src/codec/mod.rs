use std::cell::RefCell;

use ntex_bytes::BytesMut;
use ntex_codec::{Decoder, Encoder};

mod error;
mod partial;

pub use self::error::EncoderError;

use self::partial::{Partial, PartialFrame};
use crate::{consts, frame, frame::Frame, frame::Head, frame::Kind};

// 16 MB "sane default" taken from golang http2
const DEFAULT_SETTINGS_MAX_HEADER_LIST_SIZE: usize = 16 << 20;

const END_HEADERS: u8 = 0x4;

/// HTTP/2 frame codec
///
/// Decoding merges CONTINUATION frames into the preceding HEADERS or
/// PUSH_PROMISE frame, the hpack state of both directions lives here.
#[derive(Debug)]
pub struct Codec(RefCell<CodecInner>);

struct CodecInner {
    // encoder state
    encoder_hpack: hpack::Encoder<'static>,
    encoder_max_frame_size: frame::FrameSize, // Max frame size, this is specified by the peer

    // decoder state
    decoder_hpack: hpack::Decoder<'static>,
    decoder_max_frame_size: usize,
    decoder_max_header_list_size: usize,
    decoder_max_continuations: usize,
    partial: Option<Partial>, // Partially loaded headers frame
}

impl Default for Codec {
    #[inline]
    /// Returns a new `Codec` with the default max frame size
    fn default() -> Self {
        Codec(RefCell::new(CodecInner {
            decoder_hpack: hpack::Decoder::new(),
            decoder_max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE as usize,
            decoder_max_header_list_size: DEFAULT_SETTINGS_MAX_HEADER_LIST_SIZE,
            decoder_max_continuations: consts::DEFAULT_MAX_CONTINUATIONS,
            partial: None,

            encoder_hpack: hpack::Encoder::new(),
            encoder_max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
        }))
    }
}

impl Codec {
    /// Updates the max received frame size.
    ///
    /// The change takes effect the next time a frame is decoded.
    #[inline]
    pub fn set_recv_frame_size(&self, val: usize) {
        assert!(
            frame::DEFAULT_MAX_FRAME_SIZE as usize <= val
                && val <= frame::MAX_MAX_FRAME_SIZE as usize
        );
        self.0.borrow_mut().decoder_max_frame_size = val;
    }

    /// Set the max header list size that can be received.
    pub fn set_recv_header_list_size(&self, val: usize) {
        self.0.borrow_mut().decoder_max_header_list_size = val;
    }

    /// Set the max number of CONTINUATION frames of one header block.
    pub fn set_recv_continuations(&self, val: usize) {
        self.0.borrow_mut().decoder_max_continuations = val;
    }

    /// Set the peer's max frame size.
    pub fn set_send_frame_size(&self, val: usize) {
        assert!(val <= frame::MAX_MAX_FRAME_SIZE as usize);
        self.0.borrow_mut().encoder_max_frame_size = val as frame::FrameSize;
    }

    /// Peer's max frame size
    pub fn send_frame_size(&self) -> usize {
        self.0.borrow().encoder_max_frame_size as usize
    }

    /// Check if the decoder is in the middle of a header block
    pub fn is_partial(&self) -> bool {
        self.0.borrow().partial.is_some()
    }
}

impl CodecInner {
    /// Decode a complete header block or keep it as partial until
    /// END_HEADERS arrives.
    fn header_block(
        &mut self,
        mut frame: PartialFrame,
        fragment: &[u8],
        is_end_headers: bool,
    ) -> Result<Option<Frame>, frame::FrameError> {
        if !is_end_headers {
            log::trace!("loaded partial header block");
            // Defer returning the frame
            self.partial = Some(Partial {
                frame,
                buf: BytesMut::from(fragment),
                continuations: 0,
            });
            return Ok(None);
        }

        // Load the HPACK encoded headers
        let max = self.decoder_max_header_list_size;
        match frame.load_hpack(fragment, &mut self.decoder_hpack, max) {
            Ok(_) if frame.is_self_dependent() => {
                // A stream cannot depend on itself. An endpoint MUST
                // treat this as a stream error (Section 5.4.2) of type `PROTOCOL_ERROR`.
                let id = frame.stream_id();
                proto_err!(stream: "invalid HEADERS dependency ID; stream={:?}", id);
                Err(frame::FrameError::InvalidDependencyId(id))
            }
            Ok(_) => Ok(Some(frame.into())),
            Err(frame::FrameError::MalformedStream(id)) => {
                proto_err!(stream: "malformed header block; stream={:?}", id);
                Err(frame::FrameError::MalformedStream(id))
            }
            Err(e) => {
                proto_err!(conn: "failed HPACK decoding; err={:?}", e);
                Err(e)
            }
        }
    }
}

impl Decoder for Codec {
    type Item = Frame;
    type Error = frame::FrameError;

    /// Decodes a frame.
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>, frame::FrameError> {
        let mut inner = self.0.borrow_mut();

        loop {
            if src.len() < frame::HEADER_LEN {
                return Ok(None);
            }

            let len = Head::parse_len(src);
            if len > inner.decoder_max_frame_size {
                proto_err!(conn: "frame size exceeded; len={} max={}",
                    len, inner.decoder_max_frame_size);
                return Err(frame::FrameError::MaxFrameSize);
            }
            if src.len() < frame::HEADER_LEN + len {
                src.reserve(frame::HEADER_LEN + len - src.len());
                return Ok(None);
            }
            log::trace!("decoding frame from {}B", src.len());

            let mut bytes = src.split_to(frame::HEADER_LEN + len);

            // Parse the head
            let head = frame::Head::parse(&bytes);
            let kind = head.kind();
            let _ = bytes.split_to(frame::HEADER_LEN);
            let payload = bytes.freeze();

            if inner.partial.is_some() && kind != Kind::Continuation {
                proto_err!(conn: "expected CONTINUATION, got {:?}", kind);
                return Err(frame::FrameError::Continuation(
                    frame::FrameContinuationError::Expected,
                ));
            }

            let frame = match kind {
                Kind::Settings => frame::Settings::load(head, &payload)
                    .map_err(|e| {
                        proto_err!(conn: "failed to load SETTINGS frame; err={:?}", e);
                        e
                    })?
                    .into(),
                Kind::Ping => frame::Ping::load(head, &payload)
                    .map_err(|e| {
                        proto_err!(conn: "failed to load PING frame; err={:?}", e);
                        e
                    })?
                    .into(),
                Kind::WindowUpdate => frame::WindowUpdate::load(head, &payload)
                    .map_err(|e| {
                        proto_err!(conn: "failed to load WINDOW_UPDATE frame; err={:?}", e);
                        e
                    })?
                    .into(),
                Kind::Data => frame::Data::load(head, payload)
                    .map_err(|e| {
                        proto_err!(conn: "failed to load DATA frame; err={:?}", e);
                        e
                    })?
                    .into(),
                Kind::Headers => {
                    let (frame, fragment) = frame::Headers::load(head, payload).map_err(|e| {
                        proto_err!(conn: "failed to load HEADERS frame; err={:?}", e);
                        e
                    })?;
                    let is_end_headers = frame.is_end_headers();
                    match inner.header_block(
                        PartialFrame::Headers(frame),
                        &fragment,
                        is_end_headers,
                    )? {
                        Some(frame) => frame,
                        None => continue,
                    }
                }
                Kind::PushPromise => {
                    let (frame, fragment) =
                        frame::PushPromise::load(head, payload).map_err(|e| {
                            proto_err!(conn: "failed to load PUSH_PROMISE frame; err={:?}", e);
                            e
                        })?;
                    let is_end_headers = frame.is_end_headers();
                    match inner.header_block(
                        PartialFrame::PushPromise(frame),
                        &fragment,
                        is_end_headers,
                    )? {
                        Some(frame) => frame,
                        None => continue,
                    }
                }
                Kind::Reset => frame::Reset::load(head, &payload)
                    .map_err(|e| {
                        proto_err!(conn: "failed to load RESET frame; err={:?}", e);
                        e
                    })?
                    .into(),
                Kind::GoAway => frame::GoAway::load(head, &payload)
                    .map_err(|e| {
                        proto_err!(conn: "failed to load GO_AWAY frame; err={:?}", e);
                        e
                    })?
                    .into(),
                Kind::Priority => match frame::Priority::load(head, &payload) {
                    Ok(frame) => frame.into(),
                    Err(frame::FrameError::InvalidDependencyId(id)) => {
                        // A stream cannot depend on itself. An endpoint MUST
                        // treat this as a stream error (Section 5.4.2) of type
                        // `PROTOCOL_ERROR`.
                        proto_err!(stream: "PRIORITY invalid dependency ID; stream={:?}", id);
                        return Err(frame::FrameError::InvalidDependencyId(id));
                    }
                    Err(e) => {
                        proto_err!(conn: "failed to load PRIORITY frame; err={:?};", e);
                        return Err(e);
                    }
                },
                Kind::Continuation => {
                    let is_end_headers = (head.flag() & END_HEADERS) == END_HEADERS;

                    // get partial frame
                    let mut partial = inner.partial.take().ok_or_else(|| {
                        proto_err!(conn: "received unexpected CONTINUATION frame");
                        frame::FrameError::Continuation(frame::FrameContinuationError::Unexpected)
                    })?;

                    // The stream identifiers must match
                    if partial.frame.stream_id() != head.stream_id() {
                        proto_err!(conn: "CONTINUATION stream ID does not match previous frame");
                        return Err(frame::FrameError::Continuation(
                            frame::FrameContinuationError::UnknownStreamId,
                        ));
                    }

                    partial.continuations += 1;
                    if partial.continuations > inner.decoder_max_continuations {
                        proto_err!(conn: "too many CONTINUATION frames");
                        return Err(frame::FrameError::Continuation(
                            frame::FrameContinuationError::MaxContinuations,
                        ));
                    }

                    // Compressed block can not be larger than the decoded list
                    if partial.buf.len() + payload.len() > inner.decoder_max_header_list_size {
                        proto_err!(conn: "CONTINUATION frame header block size over limit");
                        return Err(frame::FrameError::Continuation(
                            frame::FrameContinuationError::MaxLeftoverSize,
                        ));
                    }
                    partial.buf.extend_from_slice(&payload);

                    if is_end_headers {
                        let buf = partial.buf.split();
                        match inner.header_block(partial.frame, &buf, true)? {
                            Some(frame) => frame,
                            None => continue,
                        }
                    } else {
                        inner.partial = Some(partial);
                        continue;
                    }
                }
                Kind::Unknown => {
                    // Unknown frames are ignored
                    log::trace!("ignoring unknown frame; len={len}");
                    continue;
                }
            };

            return Ok(Some(frame));
        }
    }
}

impl Encoder for Codec {
    type Item = Frame;
    type Error = EncoderError;

    fn encode(&self, item: Frame, buf: &mut BytesMut) -> Result<(), EncoderError> {
        let mut inner = self.0.borrow_mut();
        let max_size = inner.encoder_max_frame_size as usize;

        match item {
            Frame::Data(v) => {
                // Ensure that the payload is not greater than the max frame.
                if v.flow_len() as usize > max_size {
                    return Err(EncoderError::MaxSizeExceeded);
                }
                v.encode(buf);
            }
            Frame::Headers(v) => {
                v.encode(&mut inner.encoder_hpack, buf, max_size);
            }
            Frame::PushPromise(v) => {
                v.encode(&mut inner.encoder_hpack, buf, max_size);
            }
            Frame::Settings(v) => {
                v.encode(buf);
            }
            Frame::GoAway(v) => {
                v.encode(buf);
            }
            Frame::Ping(v) => {
                v.encode(buf);
            }
            Frame::WindowUpdate(v) => {
                v.encode(buf);
            }
            Frame::Priority(v) => {
                v.encode(buf);
            }
            Frame::Reset(v) => {
                v.encode(buf);
            }
            Frame::Preface(_) => {
                // synthetic frame, nothing goes on the wire
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for CodecInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecInner")
            .field("encoder_max_frame_size", &self.encoder_max_frame_size)
            .field("decoder_max_frame_size", &self.decoder_max_frame_size)
            .field(
                "decoder_max_header_list_size",
                &self.decoder_max_header_list_size,
            )
            .field("partial", &self.partial.is_some())
            .finish()
    }
}
