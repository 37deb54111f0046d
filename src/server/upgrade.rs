use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ntex_http::HeaderMap;

use crate::error::ConnectionError;
use crate::frame::{FrameError, Headers, Preface, PseudoHeaders, Settings, StreamId};
use crate::{session::Session, stream::StreamRef};

/// Switch an HTTP/1.1 connection to HTTP/2
///
/// `http2_settings` is the value of the `HTTP2-Settings` header of the
/// upgrade request, `pseudo` and `headers` describe the request itself.
/// The request becomes stream 1 in half-closed (remote) state, the
/// returned stream is used to send the response.
///
/// Must be called on a fresh server session, before any received bytes.
pub fn upgrade(
    session: &Session,
    http2_settings: &str,
    pseudo: PseudoHeaders,
    headers: HeaderMap,
) -> Result<StreamRef, ConnectionError> {
    let encoded = http2_settings.trim().trim_end_matches('=');
    let payload = URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
        proto_err!(conn: "cannot decode HTTP2-Settings header: {}", e);
        ConnectionError::Decoder(FrameError::InvalidSettingValue)
    })?;
    let settings = Settings::load_payload(&payload)?;
    log::debug!("upgrade request, remote settings: {:?}", settings);

    session.on_frame(Preface::new(settings).into())?;

    let id = StreamId::from(1);
    session.on_frame(Headers::new(id, pseudo, headers, true).into())?;
    session
        .get_stream(id)
        .ok_or(ConnectionError::UnknownStream(id))
}
