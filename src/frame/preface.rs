use crate::frame::{Frame, Settings};

/// Synthetic frame carrying the client preface.
///
/// Injected on the server side when a connection is upgraded from
/// HTTP/1.1, the settings come from the `HTTP2-Settings` request header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preface {
    settings: Settings,
}

impl Preface {
    pub fn new(settings: Settings) -> Self {
        Preface { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl From<Preface> for Frame {
    fn from(src: Preface) -> Self {
        Frame::Preface(src)
    }
}
