//! HTTP/2 session engine and request container.
//!
//! The crate has two halves that can be used together or separately.
//!
//! # Session engine
//!
//! [`Session`] implements both endpoints of [HTTP/2]: frame codec, stream
//! and connection state machines, flow control and the outbound frame queue.
//! The session is decoupled from the transport. Inbound bytes are fed with
//! [`Session::recv`], outbound bytes are handed to an [`exec::Flusher`].
//! Inbound stream events are delivered to a [`StreamListener`], connection
//! events to a [`ControlService`].
//!
//! [`server`] and [`client`] build sessions for either role, [`server::upgrade`]
//! switches an HTTP/1.1 connection to h2c.
//!
//! # Request container
//!
//! [`container`] routes requests to handlers with a servlet-like async
//! lifecycle: a handler may suspend a request and resume it later from any
//! thread with a dispatch, a completion or a timeout. Handlers run on the
//! tokio blocking pool behind [`exec::Exec`].
//!
//! [HTTP/2]: http://httpwg.org/specs/rfc7540.html
#![deny(rust_2018_idioms)]

macro_rules! proto_err {
    (conn: $($msg:tt)+) => {
        log::debug!("connection error PROTOCOL_ERROR -- {};", format_args!($($msg)+))
    };
    (stream: $($msg:tt)+) => {
        log::debug!("stream error PROTOCOL_ERROR -- {};", format_args!($($msg)+))
    };
}

mod callback;
mod codec;
mod config;
mod consts;
mod control;
mod default;
mod error;
mod message;
mod queue;
mod session;
mod stream;
mod window;

pub mod client;
pub mod container;
pub mod exec;
pub mod frame;
pub mod registry;
pub mod server;

pub use self::callback::{Callback, Promise};
pub use self::codec::Codec;
pub use self::config::Config;
pub use self::control::{
    AppError, Control, ControlAck, ControlService, GoAway, PeerGone, Terminated,
};
pub use self::default::{DefaultControlService, DefaultStreamListener};
pub use self::message::{ListenerError, Message, MessageKind, StreamEof, StreamListener};
pub use self::session::{Role, Session, SessionState};
pub use self::stream::{Capacity, StreamRef, StreamState};

pub use crate::error::{AsyncError, ConnectionError, EncoderError, ExecError, HandlerError};
pub use crate::error::{OperationError, StreamError};
