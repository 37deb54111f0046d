#![allow(dead_code)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::io;

use ntex_bytes::{Bytes, BytesMut};
use ntex_codec::{Decoder, Encoder};
use ntex_container::exec::{FlushDone, Flusher};
use ntex_container::frame::{self, Frame};
use ntex_container::{client, server, Codec, Config, ConnectionError, ListenerError, Message};
use ntex_container::{Session, StreamListener};
use ntex_http::uri::Scheme;

pub mod frames;
mod utils;

pub use self::utils::*;

pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// In-memory outbound half of a connection
#[derive(Default)]
pub struct Pipe {
    buf: Mutex<BytesMut>,
    fail: AtomicBool,
    hold: AtomicBool,
    held: Mutex<Vec<FlushDone>>,
    shutdown: AtomicBool,
}

impl Pipe {
    pub fn take(&self) -> BytesMut {
        self.buf.lock().unwrap().split()
    }

    /// Fail all following flushes
    pub fn break_pipe(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Keep following flushes in flight until `release`
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Complete held flushes
    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        let held = std::mem::take(&mut *self.held.lock().unwrap());
        for done in held {
            done(Ok(()));
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Flusher for Pipe {
    fn flush(&self, buf: Bytes, done: FlushDone) {
        if self.fail.load(Ordering::SeqCst) {
            done(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")));
        } else {
            self.buf.lock().unwrap().extend_from_slice(&buf);
            if self.hold.load(Ordering::SeqCst) {
                self.held.lock().unwrap().push(done);
            } else {
                done(Ok(()));
            }
        }
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Remote side of a session
pub struct Peer {
    pub codec: Codec,
    pub pipe: Arc<Pipe>,
}

impl Peer {
    pub fn new(pipe: Arc<Pipe>) -> Self {
        Peer {
            pipe,
            codec: Codec::default(),
        }
    }

    pub fn encode<T: Into<Frame>>(&self, frm: T) -> BytesMut {
        let mut buf = BytesMut::new();
        self.codec.encode(frm.into(), &mut buf).unwrap();
        buf
    }

    /// Feed frame to the session
    pub fn send<T: Into<Frame>>(&self, session: &Session, frm: T) -> Result<(), ConnectionError> {
        let mut buf = self.encode(frm);
        session.recv(&mut buf)
    }

    /// Decode everything the session has written so far
    pub fn frames(&self) -> Vec<Frame> {
        let mut buf = self.pipe.take();
        let mut frames = Vec::new();
        while let Some(frm) = self.codec.decode(&mut buf).unwrap() {
            frames.push(frm);
        }
        assert!(buf.is_empty(), "incomplete frame: {:?}", buf);
        frames
    }

    /// Consume the client connection preface
    pub fn read_preface(&self) {
        let mut buf = self.pipe.take();
        assert_eq!(&buf[..PREFACE.len()], PREFACE);
        let rest = buf.split_off(PREFACE.len());
        *self.pipe.buf.lock().unwrap() = rest;
    }
}

/// Stream listener that forwards messages to a channel
pub struct Collect(Mutex<mpsc::Sender<Message>>);

impl StreamListener for Collect {
    fn on_message(&self, msg: Message) -> Result<(), ListenerError> {
        let _ = self.0.lock().unwrap().send(msg);
        Ok(())
    }
}

pub fn collect() -> (Collect, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel();
    (Collect(Mutex::new(tx)), rx)
}

/// Server session with completed handshake
pub fn start_server(config: Config) -> (Session, Peer, mpsc::Receiver<Message>) {
    let _ = env_logger::try_init();

    let (listener, rx) = collect();
    let pipe = Arc::new(Pipe::default());
    let session = server::ServerBuilder::new()
        .configure(|_| config)
        .finish(listener)
        .handshake(pipe.clone());
    let peer = Peer::new(pipe);

    let mut buf = BytesMut::from(PREFACE);
    buf.extend_from_slice(&peer.encode(frames::settings()));
    session.recv(&mut buf).unwrap();
    peer.send(&session, frames::settings_ack()).unwrap();
    peer.frames();

    (session, peer, rx)
}

/// Client with completed handshake
pub fn start_client() -> (client::Client, Peer) {
    let _ = env_logger::try_init();

    let pipe = Arc::new(Pipe::default());
    let client =
        client::ClientBuilder::new(Scheme::HTTP, "localhost".into()).handshake(pipe.clone());
    let peer = Peer::new(pipe);
    peer.read_preface();

    peer.send(client.session(), frames::settings()).unwrap();
    peer.send(client.session(), frames::settings_ack()).unwrap();
    peer.frames();

    (client, peer)
}

pub fn get_headers(frm: Frame) -> frame::Headers {
    match frm {
        Frame::Headers(hdrs) => hdrs,
        _ => panic!("Expect Headers frame: {:?}", frm),
    }
}

pub fn get_data(frm: Frame) -> frame::Data {
    match frm {
        Frame::Data(data) => data,
        _ => panic!("Expect Data frame: {:?}", frm),
    }
}

pub fn get_reset(frm: Frame) -> frame::Reset {
    match frm {
        Frame::Reset(rst) => rst,
        _ => panic!("Expect Reset frame: {:?}", frm),
    }
}

pub fn get_goaway(frm: Frame) -> frame::GoAway {
    match frm {
        Frame::GoAway(f) => f,
        _ => panic!("Expect GoAway frame: {:?}", frm),
    }
}

#[macro_export]
macro_rules! get_message_headers {
    ($msg: ident) => {{
        use ntex_container::MessageKind;

        match $msg.kind().take() {
            MessageKind::Headers {
                pseudo,
                headers,
                eof,
            } => (pseudo, headers, eof),
            kind => panic!("unexpected message kind; actual={:?}", kind),
        }
    }};
}
