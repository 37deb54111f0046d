//! Http2 client

#[allow(clippy::module_inception)]
mod client;

pub use self::client::{Client, ClientBuilder};
