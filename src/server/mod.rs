//! Server side of the session engine
use ntex_bytes::BytesMut;

use crate::{consts, error::ConnectionError};

mod builder;
mod upgrade;

pub use self::builder::{Server, ServerBuilder};
pub use self::upgrade::upgrade;

/// Consume client connection preface
///
/// Returns `Ok(false)` if more bytes are required.
pub(crate) fn read_preface(src: &mut BytesMut) -> Result<bool, ConnectionError> {
    let len = consts::PREFACE.len().min(src.len());
    if src[..len] != consts::PREFACE[..len] {
        log::trace!("read_preface: invalid preface {:?}", &src[..len]);
        return Err(ConnectionError::InvalidPreface);
    }
    if len < consts::PREFACE.len() {
        Ok(false)
    } else {
        let _ = src.split_to(consts::PREFACE.len());
        log::debug!("Preface has been received");
        Ok(true)
    }
}
