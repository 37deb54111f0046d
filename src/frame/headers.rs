use std::{cmp, fmt};

use ntex_bytes::{BufMut, ByteString, Bytes, BytesMut};
use ntex_http::{header, uri, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

use super::priority::StreamDependency;
use super::{util, Frame, FrameError, Head, Kind, StreamId};

/// Header frame
///
/// This could be either a request or a response.
#[derive(Clone)]
pub struct Headers {
    /// The ID of the stream with which this frame is associated.
    stream_id: StreamId,

    /// The stream dependency information, if any.
    stream_dep: Option<StreamDependency>,

    /// The decoded header block
    header_block: HeaderBlock,

    /// The associated flags
    flags: HeadersFlag,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct HeadersFlag(u8);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PseudoHeaders {
    // Request
    pub method: Option<Method>,
    pub scheme: Option<ByteString>,
    pub authority: Option<ByteString>,
    pub path: Option<ByteString>,

    // Response
    pub status: Option<StatusCode>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct HeaderBlock {
    /// The decoded header fields
    pub(crate) fields: HeaderMap,

    /// Pseudo headers, these are broken out as they must be sent as part of the
    /// headers frame.
    pub(crate) pseudo: PseudoHeaders,
}

pub(super) const END_STREAM: u8 = 0x1;
pub(super) const END_HEADERS: u8 = 0x4;
pub(super) const PADDED: u8 = 0x8;
const PRIORITY: u8 = 0x20;
const ALL: u8 = END_STREAM | END_HEADERS | PADDED | PRIORITY;

// ===== impl Headers =====

impl Headers {
    /// Create a new HEADERS frame
    pub fn new(stream_id: StreamId, pseudo: PseudoHeaders, fields: HeaderMap, eof: bool) -> Self {
        let mut flags = HeadersFlag::default();
        if eof {
            flags.set_end_stream();
        }
        Headers {
            flags,
            stream_id,
            stream_dep: None,
            header_block: HeaderBlock { fields, pseudo },
        }
    }

    pub fn trailers(stream_id: StreamId, fields: HeaderMap) -> Self {
        let mut flags = HeadersFlag::default();
        flags.set_end_stream();

        Headers {
            stream_id,
            flags,
            stream_dep: None,
            header_block: HeaderBlock {
                fields,
                pseudo: PseudoHeaders::default(),
            },
        }
    }

    /// Loads the header frame but doesn't actually do HPACK decoding.
    ///
    /// Returns the frame and its header block fragment, HPACK decoding
    /// is done in the `load_hpack` step once the block is complete.
    pub fn load(head: Head, mut src: Bytes) -> Result<(Self, Bytes), FrameError> {
        let flags = HeadersFlag::load(head.flag());

        if head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }

        // Read the padding length
        let pad = if flags.is_padded() {
            if src.is_empty() {
                return Err(FrameError::MalformedMessage);
            }
            let pad = src[0] as usize;

            // Drop the padding
            let _ = src.split_to(1);
            pad
        } else {
            0
        };

        // Read the stream dependency
        let stream_dep = if flags.is_priority() {
            if src.len() < 5 {
                return Err(FrameError::MalformedMessage);
            }
            // Self dependency is a stream error, it is reported by the codec
            // after the header block is decoded so the hpack state stays intact.
            let stream_dep = StreamDependency::load(&src[..5])?;

            // Drop the next 5 bytes
            let _ = src.split_to(5);
            Some(stream_dep)
        } else {
            None
        };

        if pad > 0 {
            if pad > src.len() {
                return Err(FrameError::TooMuchPadding);
            }
            src.truncate(src.len() - pad);
        }

        let headers = Headers {
            flags,
            stream_dep,
            stream_id: head.stream_id(),
            header_block: HeaderBlock::default(),
        };
        Ok((headers, src))
    }

    pub fn load_hpack(
        &mut self,
        src: &[u8],
        decoder: &mut hpack::Decoder<'static>,
        max_list_size: usize,
    ) -> Result<(), FrameError> {
        self.header_block = HeaderBlock::load(self.stream_id, src, decoder, max_list_size)?;
        Ok(())
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn stream_dependency(&self) -> Option<&StreamDependency> {
        self.stream_dep.as_ref()
    }

    pub(crate) fn is_self_dependent(&self) -> bool {
        self.stream_dep
            .map(|dep| dep.dependency_id() == self.stream_id)
            .unwrap_or(false)
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags.is_end_headers()
    }

    pub fn set_end_headers(&mut self) {
        self.flags.set_end_headers();
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags.is_end_stream()
    }

    pub fn set_end_stream(&mut self) {
        self.flags.set_end_stream()
    }

    pub fn into_parts(self) -> (PseudoHeaders, HeaderMap) {
        (self.header_block.pseudo, self.header_block.fields)
    }

    pub fn fields(&self) -> &HeaderMap {
        &self.header_block.fields
    }

    pub fn pseudo(&self) -> &PseudoHeaders {
        &self.header_block.pseudo
    }

    pub fn into_fields(self) -> HeaderMap {
        self.header_block.fields
    }

    pub fn encode(
        self,
        encoder: &mut hpack::Encoder<'static>,
        dst: &mut BytesMut,
        max_size: usize,
    ) {
        // At this point, the `is_end_headers` flag should always be set
        debug_assert!(self.flags.is_end_headers());

        // Get the HEADERS frame head
        let head = self.head();

        self.header_block.encode(encoder, &head, None, dst, max_size);
    }

    fn head(&self) -> Head {
        Head::new(Kind::Headers, self.flags.into(), self.stream_id)
    }
}

impl From<Headers> for Frame {
    fn from(src: Headers) -> Self {
        Frame::Headers(src)
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("Headers");
        builder
            .field("stream_id", &self.stream_id)
            .field("flags", &self.flags)
            .field("pseudo", &self.header_block.pseudo);

        if let Some(ref dep) = self.stream_dep {
            builder.field("stream_dep", dep);
        }

        // `fields` purposefully not included
        builder.finish()
    }
}

// ===== impl Pseudo =====

impl PseudoHeaders {
    pub fn request(method: Method, uri: Uri) -> Self {
        let parts = uri::Parts::from(uri);

        let mut path = parts
            .path_and_query
            .map(|v| ByteString::from(v.as_str()))
            .unwrap_or(ByteString::from_static(""));

        match method {
            Method::OPTIONS | Method::CONNECT => {}
            _ if path.is_empty() => {
                path = ByteString::from_static("/");
            }
            _ => {}
        }

        let mut pseudo = PseudoHeaders {
            method: Some(method),
            scheme: None,
            authority: None,
            path: Some(path).filter(|p| !p.is_empty()),
            status: None,
        };

        // If the URI includes a scheme component, add it to the pseudo headers
        if let Some(scheme) = parts.scheme {
            pseudo.set_scheme(scheme);
        }

        // If the URI includes an authority component, add it to the pseudo
        // headers
        if let Some(authority) = parts.authority {
            pseudo.set_authority(ByteString::from(authority.as_str()));
        }

        pseudo
    }

    pub fn response(status: StatusCode) -> Self {
        PseudoHeaders {
            method: None,
            scheme: None,
            authority: None,
            path: None,
            status: Some(status),
        }
    }

    pub fn set_status(&mut self, value: StatusCode) {
        self.status = Some(value);
    }

    pub fn set_scheme(&mut self, scheme: uri::Scheme) {
        self.scheme = Some(match scheme.as_str() {
            "http" => ByteString::from_static("http"),
            "https" => ByteString::from_static("https"),
            s => ByteString::from(s),
        });
    }

    pub fn set_authority(&mut self, authority: ByteString) {
        self.authority = Some(authority);
    }

    /// Request pseudo headers carry a method and a path, CONNECT requests
    /// carry an authority instead of a path.
    pub fn is_valid_request(&self) -> bool {
        match self.method {
            Some(Method::CONNECT) => self.authority.is_some() && self.path.is_none(),
            Some(_) => self.path.is_some() && self.status.is_none(),
            None => false,
        }
    }
}

// ===== impl HeadersFlag =====

impl HeadersFlag {
    pub fn empty() -> HeadersFlag {
        HeadersFlag(0)
    }

    pub fn load(bits: u8) -> HeadersFlag {
        HeadersFlag(bits & ALL)
    }

    pub fn is_end_stream(&self) -> bool {
        self.0 & END_STREAM == END_STREAM
    }

    pub fn set_end_stream(&mut self) {
        self.0 |= END_STREAM;
    }

    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS == END_HEADERS
    }

    pub fn set_end_headers(&mut self) {
        self.0 |= END_HEADERS;
    }

    pub fn is_padded(&self) -> bool {
        self.0 & PADDED == PADDED
    }

    pub fn is_priority(&self) -> bool {
        self.0 & PRIORITY == PRIORITY
    }
}

impl Default for HeadersFlag {
    /// Returns a `HeadersFlag` value with `END_HEADERS` set.
    fn default() -> Self {
        HeadersFlag(END_HEADERS)
    }
}

impl From<HeadersFlag> for u8 {
    fn from(src: HeadersFlag) -> u8 {
        src.0
    }
}

impl fmt::Debug for HeadersFlag {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        util::debug_flags(fmt, self.0)
            .flag_if(self.is_end_headers(), "END_HEADERS")
            .flag_if(self.is_end_stream(), "END_STREAM")
            .flag_if(self.is_padded(), "PADDED")
            .flag_if(self.is_priority(), "PRIORITY")
            .finish()
    }
}

// ===== HeaderBlock =====

/// Per RFC 7541 section 4.1, each entry accounts for 32 octets of overhead
const HEADER_ENTRY_OVERHEAD: usize = 32;

impl HeaderBlock {
    pub(crate) fn load(
        stream_id: StreamId,
        src: &[u8],
        decoder: &mut hpack::Decoder<'static>,
        max_list_size: usize,
    ) -> Result<HeaderBlock, FrameError> {
        // The hpack state is connection level, so the whole block is decoded
        // before any field is validated. A malformed field is a stream level
        // error and must not corrupt the state of other streams.
        let list = match decoder.decode(src) {
            Ok(list) => list,
            Err(e) => {
                log::trace!("hpack decoding error; err={e:?}");
                return Err(FrameError::Hpack);
            }
        };

        let mut block = HeaderBlock::default();
        let mut reg = false;
        let mut malformed = false;
        let mut list_size = 0;

        macro_rules! set_pseudo {
            ($field:ident, $val:expr) => {{
                if reg {
                    log::trace!("load_hpack; header malformed -- pseudo not at head of block");
                    malformed = true;
                } else if block.pseudo.$field.is_some() {
                    log::trace!("load_hpack; header malformed -- repeated pseudo");
                    malformed = true;
                } else if let Some(val) = $val {
                    block.pseudo.$field = Some(val);
                } else {
                    log::trace!("load_hpack; header malformed -- invalid pseudo value");
                    malformed = true;
                }
            }};
        }

        for (name, value) in list {
            list_size += name.len() + value.len() + HEADER_ENTRY_OVERHEAD;

            match name.as_slice() {
                b":method" => set_pseudo!(method, Method::from_bytes(&value).ok()),
                b":scheme" => set_pseudo!(scheme, to_string(value)),
                b":authority" => set_pseudo!(authority, to_string(value)),
                b":path" => set_pseudo!(path, to_string(value)),
                b":status" => set_pseudo!(status, StatusCode::from_bytes(&value).ok()),
                n if n.first() == Some(&b':') => {
                    log::trace!("load_hpack; unknown pseudo header");
                    malformed = true;
                }
                n if n.iter().any(|c| c.is_ascii_uppercase()) => {
                    log::trace!("load_hpack; uppercase header name");
                    malformed = true;
                }
                n => {
                    let (Ok(name), Ok(value)) =
                        (HeaderName::from_bytes(n), HeaderValue::from_bytes(&value))
                    else {
                        malformed = true;
                        continue;
                    };

                    // Connection level header fields are not supported and must
                    // result in a protocol error.
                    if name == header::CONNECTION
                        || name == header::TRANSFER_ENCODING
                        || name == header::UPGRADE
                        || name == "keep-alive"
                        || name == "proxy-connection"
                    {
                        log::trace!("load_hpack; connection level header");
                        malformed = true;
                    } else if name == header::TE && value != "trailers" {
                        log::trace!("load_hpack; TE header not set to trailers; val={value:?}");
                        malformed = true;
                    } else {
                        reg = true;
                        block.fields.append(name, value);
                    }
                }
            }
        }

        if list_size > max_list_size {
            log::trace!("header list size exceeded; size={list_size} max={max_list_size}");
            return Err(FrameError::MalformedStream(stream_id));
        }

        if malformed {
            log::trace!("malformed message");
            return Err(FrameError::MalformedStream(stream_id));
        }

        Ok(block)
    }

    /// Encodes the block into a frame of the given head followed by as many
    /// CONTINUATION frames as `max_size` requires.
    pub(crate) fn encode(
        self,
        encoder: &mut hpack::Encoder<'static>,
        head: &Head,
        promised_id: Option<StreamId>,
        dst: &mut BytesMut,
        max_size: usize,
    ) {
        let hpack = self.hpack(encoder);
        let prefix = if promised_id.is_some() { 4 } else { 0 };

        let mut head = *head;
        let mut start = 0;
        let mut first = true;
        loop {
            let room = if first { max_size - prefix } else { max_size };
            let end = cmp::min(start + room, hpack.len());

            if hpack.len() > end {
                Head::new(head.kind(), head.flag() & !END_HEADERS, head.stream_id())
                    .encode(end - start + if first { prefix } else { 0 }, dst);
            } else {
                head.encode(end - start + if first { prefix } else { 0 }, dst);
            }
            if first {
                if let Some(id) = promised_id {
                    dst.put_u32(id.into());
                }
            }
            dst.extend_from_slice(&hpack[start..end]);

            if hpack.len() > end {
                head = Head::new(Kind::Continuation, END_HEADERS, head.stream_id());
                start = end;
                first = false;
            } else {
                break;
            }
        }
    }

    fn hpack(&self, encoder: &mut hpack::Encoder<'static>) -> Vec<u8> {
        let pseudo = &self.pseudo;
        let mut list: Vec<(&[u8], &[u8])> = Vec::new();

        if let Some(ref method) = pseudo.method {
            list.push((&b":method"[..], method.as_str().as_bytes()));
        }
        if let Some(ref scheme) = pseudo.scheme {
            list.push((&b":scheme"[..], scheme.as_bytes()));
        }
        if let Some(ref authority) = pseudo.authority {
            list.push((&b":authority"[..], authority.as_bytes()));
        }
        if let Some(ref path) = pseudo.path {
            list.push((&b":path"[..], path.as_bytes()));
        }
        if let Some(ref status) = pseudo.status {
            list.push((&b":status"[..], status.as_str().as_bytes()));
        }
        for (name, value) in self.fields.iter() {
            list.push((name.as_str().as_bytes(), value.as_bytes()));
        }

        encoder.encode(list)
    }
}

fn to_string(value: Vec<u8>) -> Option<ByteString> {
    String::from_utf8(value).ok().map(ByteString::from)
}
