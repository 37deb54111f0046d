use std::io::Cursor;
use std::sync::{mpsc, Arc, Mutex};

use ntex_bytes::{Bytes, BytesMut};
use ntex_container::frame::{self, Frame, PseudoHeaders, Reason};
use ntex_container::{server, Callback, Config, Control, ControlAck, DefaultStreamListener};
use ntex_container::{ConnectionError, ListenerError, Message, MessageKind, OperationError};
use ntex_container::{Promise, SessionState, StreamEof, StreamRef};
use ntex_http::{HeaderMap, Method, StatusCode};
use ntex_util::time::Seconds;

mod support;

use support::*;

fn request(id: u32) -> frames::Mock<frame::Headers> {
    frames::headers(id).request(Method::GET, "https://example.com/index.html")
}

/// Callback that reports its result to a channel
fn report() -> (Callback, mpsc::Receiver<Result<(), OperationError>>) {
    let (tx, rx) = mpsc::channel();
    (
        Callback::new(move |res| {
            let _ = tx.send(res);
        }),
        rx,
    )
}

/// Control service that records event names
fn controls() -> (
    impl Fn(Control) -> ControlAck + Send + Sync,
    mpsc::Receiver<&'static str>,
) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let service = move |msg: Control| {
        let name = match msg {
            Control::AppError(_) => "app-error",
            Control::ConnectionError(_) => "connection-error",
            Control::GoAway(_) => "goaway",
            Control::PeerGone(_) => "peer-gone",
            Control::Terminated(_) => "terminated",
        };
        let _ = tx.lock().unwrap().send(name);
        msg.ack()
    };
    (service, rx)
}

#[test]
fn handshake() {
    let _ = env_logger::try_init();

    let (listener, _rx) = collect();
    let pipe = Arc::new(Pipe::default());
    let session = server::ServerBuilder::new()
        .finish(listener)
        .handshake(pipe.clone());
    let peer = Peer::new(pipe);

    let frames = peer.frames();
    assert_eq!(frames.len(), 2);
    match frames[0] {
        Frame::Settings(ref s) => {
            assert!(!s.is_ack());
            assert_eq!(s.is_push_enabled(), Some(false));
            assert_eq!(s.max_concurrent_streams(), Some(256));
        }
        ref frm => panic!("unexpected frame {:?}", frm),
    }
    match frames[1] {
        Frame::WindowUpdate(ref w) => {
            assert!(w.stream_id().is_zero());
            assert_eq!(w.size_increment(), 1_048_576 - 65_535);
        }
        ref frm => panic!("unexpected frame {:?}", frm),
    }

    let mut buf = BytesMut::from(PREFACE);
    buf.extend_from_slice(&peer.encode(frames::settings()));
    session.recv(&mut buf).unwrap();
    assert!(buf.is_empty());

    let frames = peer.frames();
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], Frame::Settings(ref s) if s.is_ack()));
    assert_eq!(session.state(), SessionState::Open);
}

#[test]
fn invalid_preface() {
    let _ = env_logger::try_init();

    let (listener, _rx) = collect();
    let pipe = Arc::new(Pipe::default());
    let session = server::ServerBuilder::new()
        .finish(listener)
        .handshake(pipe.clone());
    let peer = Peer::new(pipe.clone());
    peer.frames();

    let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n\r\n"[..]);
    assert!(matches!(
        session.recv(&mut buf),
        Err(ConnectionError::InvalidPreface)
    ));
    assert_eq!(session.state(), SessionState::Closed);

    let frames = peer.frames();
    assert_eq!(frames.len(), 1);
    let goaway = get_goaway(frames.into_iter().next().unwrap());
    assert_eq!(goaway.reason(), Reason::PROTOCOL_ERROR);
    assert!(pipe.is_shutdown());
}

#[test]
fn settings_expected_first() {
    let _ = env_logger::try_init();

    let (listener, _rx) = collect();
    let pipe = Arc::new(Pipe::default());
    let session = server::ServerBuilder::new()
        .finish(listener)
        .handshake(pipe.clone());
    let peer = Peer::new(pipe);
    peer.frames();

    let mut buf = BytesMut::from(PREFACE);
    buf.extend_from_slice(&peer.encode(frames::ping([0; 8])));
    assert!(session.recv(&mut buf).is_err());

    let frames = peer.frames();
    let goaway = get_goaway(frames.into_iter().last().unwrap());
    assert_eq!(goaway.reason(), Reason::PROTOCOL_ERROR);
}

#[test]
fn request_response() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, request(1).eos()).unwrap();
    let mut msg = rx.try_recv().unwrap();
    let (pseudo, _, eof) = get_message_headers!(msg);
    assert_eq!(pseudo.method, Some(Method::GET));
    assert_eq!(pseudo.path, Some("/index.html".into()));
    assert!(eof);
    assert_eq!(session.active_streams(), 1);

    let stream = msg.stream().clone();
    let (cb1, res1) = report();
    let (cb2, res2) = report();
    stream.send_response(StatusCode::OK, HeaderMap::new(), false, cb1);
    stream.send_data(Bytes::from_static(b"hello"), true, cb2);
    assert!(res1.try_recv().unwrap().is_ok());
    assert!(res2.try_recv().unwrap().is_ok());

    let mut frames = peer.frames().into_iter();
    let hdrs = get_headers(frames.next().unwrap());
    assert_eq!(hdrs.stream_id(), 1);
    assert_eq!(hdrs.pseudo().status, Some(StatusCode::OK));
    assert!(!hdrs.is_end_stream());
    let data = get_data(frames.next().unwrap());
    assert_eq!(data.payload(), &b"hello"[..]);
    assert!(data.is_end_stream());
    assert!(frames.next().is_none());

    assert_eq!(session.active_streams(), 0);
    assert_eq!(stream.state(), None);
    assert!(session.bytes_written() > 0);

    // stream is gone
    let (cb, res) = report();
    stream.send_data(Bytes::from_static(b"more"), true, cb);
    assert!(matches!(res.try_recv().unwrap(), Err(OperationError::Closed)));
}

#[test]
fn request_body_and_trailers() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, request(1)).unwrap();
    peer.send(&session, frames::data(1, "chunk")).unwrap();
    let mut trailers = HeaderMap::new();
    trailers.insert("x-checksum".parse().unwrap(), "1".parse().unwrap());
    let trailers_frame = frame::Headers::trailers(1.into(), trailers);
    peer.send(&session, trailers_frame).unwrap();

    let mut msg = rx.try_recv().unwrap();
    let (_, _, eof) = get_message_headers!(msg);
    assert!(!eof);

    let mut msg = rx.try_recv().unwrap();
    match msg.kind().take() {
        MessageKind::Data(data, cap) => {
            assert_eq!(data, Bytes::from_static(b"chunk"));
            assert_eq!(cap.size(), 5);
            cap.consume();
        }
        kind => panic!("unexpected message {:?}", kind),
    }

    let mut msg = rx.try_recv().unwrap();
    match msg.kind().take() {
        MessageKind::Eof(StreamEof::Trailers(hdrs)) => {
            assert_eq!(hdrs.get("x-checksum").unwrap(), "1");
        }
        kind => panic!("unexpected message {:?}", kind),
    }
}

#[test]
fn ping_pong() {
    let (session, peer, _rx) = start_server(Config::new());

    peer.send(&session, frames::ping([1, 2, 3, 4, 5, 6, 7, 8])).unwrap();
    let frames = peer.frames();
    assert_eq!(frames.len(), 1);
    match frames[0] {
        Frame::Ping(ref ping) => {
            assert!(ping.is_ack());
            assert_eq!(ping.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        }
        ref frm => panic!("unexpected frame {:?}", frm),
    }

    let (cb, res) = report();
    session.ping(cb);
    let payload = match peer.frames().into_iter().next() {
        Some(Frame::Ping(ping)) if !ping.is_ack() => ping.into_payload(),
        frm => panic!("unexpected frame {:?}", frm),
    };
    assert!(res.try_recv().is_err());

    peer.send(&session, frames::ping(payload).pong()).unwrap();
    assert!(res.try_recv().unwrap().is_ok());
}

#[test]
fn recv_window_update() {
    let (session, peer, rx) = start_server(Config::new().set_initial_window_size(20_000));

    peer.send(&session, request(1)).unwrap();
    let _ = rx.try_recv().unwrap();

    peer.send(&session, frames::data(1, vec![0u8; 16_000])).unwrap();
    let mut msg = rx.try_recv().unwrap();
    let cap = match msg.kind().take() {
        MessageKind::Data(_, cap) => cap,
        kind => panic!("unexpected message {:?}", kind),
    };
    assert!(peer.frames().is_empty());

    cap.consume();
    let frames = peer.frames();
    assert_eq!(frames.len(), 1);
    match frames[0] {
        Frame::WindowUpdate(ref w) => {
            assert_eq!(w.stream_id(), 1);
            assert_eq!(w.size_increment(), 16_000);
        }
        ref frm => panic!("unexpected frame {:?}", frm),
    }
}

#[test]
fn recv_window_overflow() {
    let (session, peer, rx) = start_server(Config::new().set_initial_window_size(20_000));

    peer.send(&session, request(1)).unwrap();
    let _ = rx.try_recv().unwrap();

    peer.send(&session, frames::data(1, vec![0u8; 16_000])).unwrap();
    peer.send(&session, frames::data(1, vec![0u8; 16_000])).unwrap();

    let frames = peer.frames();
    let rst = get_reset(frames.into_iter().last().unwrap());
    assert_eq!(rst.stream_id(), 1);
    assert_eq!(rst.reason(), Reason::FLOW_CONTROL_ERROR);
    assert_eq!(session.state(), SessionState::Open);
}

#[test]
fn send_flow_control() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, frames::settings().initial_window_size(10)).unwrap();
    peer.frames();

    peer.send(&session, request(1).eos()).unwrap();
    let msg = rx.try_recv().unwrap();
    let stream = msg.stream().clone();

    let (cb, res) = report();
    stream.send_response(StatusCode::OK, HeaderMap::new(), false, Callback::noop());
    stream.send_data(Bytes::from_static(b"hello world!!!"), true, cb);

    let mut frames = peer.frames().into_iter();
    let _ = get_headers(frames.next().unwrap());
    let data = get_data(frames.next().unwrap());
    assert_eq!(data.payload(), &b"hello worl"[..]);
    assert!(!data.is_end_stream());
    assert!(frames.next().is_none());
    assert!(res.try_recv().is_err());

    peer.send(&session, frames::window_update(1, 10)).unwrap();
    let mut frames = peer.frames().into_iter();
    let data = get_data(frames.next().unwrap());
    assert_eq!(data.payload(), &b"d!!!"[..]);
    assert!(data.is_end_stream());
    assert!(res.try_recv().unwrap().is_ok());
    assert_eq!(session.active_streams(), 0);
}

#[test]
fn max_concurrent_streams() {
    let (session, peer, rx) = start_server(Config::new().set_max_concurrent_streams(1));

    peer.send(&session, request(1)).unwrap();
    peer.send(&session, request(3)).unwrap();

    let frames = peer.frames();
    assert_eq!(frames.len(), 1);
    let rst = get_reset(frames.into_iter().next().unwrap());
    assert_eq!(rst.stream_id(), 3);
    assert_eq!(rst.reason(), Reason::REFUSED_STREAM);

    assert_eq!(rx.try_recv().unwrap().stream().id(), 1);
    assert!(rx.try_recv().is_err());
    assert_eq!(session.active_streams(), 1);
}

#[test]
fn stream_id_must_increase() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, request(3).eos()).unwrap();
    let _ = rx.try_recv().unwrap();
    assert!(matches!(
        peer.send(&session, request(1).eos()),
        Err(ConnectionError::InvalidStreamId(_))
    ));
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn listener_error_resets_stream() {
    let _ = env_logger::try_init();

    let pipe = Arc::new(Pipe::default());
    let session = server::ServerBuilder::new()
        .finish(|mut msg: Message| -> Result<(), ListenerError> {
            match msg.kind().take() {
                MessageKind::Headers { .. } => Err("unsupported".into()),
                _ => Ok(()),
            }
        })
        .handshake(pipe.clone());
    let peer = Peer::new(pipe);

    let mut buf = BytesMut::from(PREFACE);
    buf.extend_from_slice(&peer.encode(frames::settings()));
    session.recv(&mut buf).unwrap();
    peer.frames();

    peer.send(&session, request(1)).unwrap();
    let rst = get_reset(peer.frames().into_iter().next().unwrap());
    assert_eq!(rst.stream_id(), 1);
    assert_eq!(rst.reason(), Reason::CANCEL);
    assert_eq!(session.active_streams(), 0);
}

#[test]
fn remote_goaway() {
    let _ = env_logger::try_init();

    let (service, events) = controls();
    let (listener, _rx) = collect();
    let pipe = Arc::new(Pipe::default());
    let session = server::ServerBuilder::new()
        .control(service)
        .finish(listener)
        .handshake(pipe.clone());
    let peer = Peer::new(pipe.clone());

    let mut buf = BytesMut::from(PREFACE);
    buf.extend_from_slice(&peer.encode(frames::settings()));
    session.recv(&mut buf).unwrap();
    peer.frames();

    peer.send(&session, frames::go_away(0).no_error()).unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(events.try_recv().unwrap(), "goaway");
    assert_eq!(events.try_recv().unwrap(), "terminated");
    assert!(pipe.is_shutdown());
}

#[test]
fn remote_goaway_keeps_streams() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, request(1).eos()).unwrap();
    let msg = rx.try_recv().unwrap();

    peer.send(&session, frames::go_away(1).no_error()).unwrap();
    assert_eq!(session.state(), SessionState::GoingAwayRemote);

    msg.stream()
        .send_response(StatusCode::NO_CONTENT, HeaderMap::new(), true, Callback::noop());
    let hdrs = get_headers(peer.frames().into_iter().next().unwrap());
    assert_eq!(hdrs.pseudo().status, Some(StatusCode::NO_CONTENT));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(peer.pipe.is_shutdown());
}

#[test]
fn graceful_close() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, request(1).eos()).unwrap();
    let msg = rx.try_recv().unwrap();

    session.close();
    assert_eq!(session.state(), SessionState::GoingAwayLocal);
    let goaway = get_goaway(peer.frames().into_iter().next().unwrap());
    assert_eq!(goaway.reason(), Reason::NO_ERROR);
    assert_eq!(goaway.last_stream_id(), 1);

    // new streams are refused
    peer.send(&session, request(3).eos()).unwrap();
    let rst = get_reset(peer.frames().into_iter().next().unwrap());
    assert_eq!(rst.stream_id(), 3);
    assert_eq!(rst.reason(), Reason::REFUSED_STREAM);
    assert!(rx.try_recv().is_err());

    msg.stream()
        .send_response(StatusCode::OK, HeaderMap::new(), true, Callback::noop());
    let _ = get_headers(peer.frames().into_iter().next().unwrap());
    assert_eq!(session.state(), SessionState::Closed);
    assert!(peer.pipe.is_shutdown());
}

#[test]
fn goaway_grace_expires() {
    let (session, peer, rx) = start_server(Config::new().set_goaway_grace(Seconds(0)));

    peer.send(&session, request(1)).unwrap();
    let _ = rx.try_recv().unwrap();

    session.close();
    assert_eq!(session.state(), SessionState::GoingAwayLocal);
    assert!(session.on_idle_timeout());
    assert_eq!(session.state(), SessionState::Closed);

    let mut msg = rx.try_recv().unwrap();
    assert!(matches!(
        msg.kind().take(),
        MessageKind::Disconnect(OperationError::GoAway(Reason::NO_ERROR))
    ));
}

#[test]
fn settings_window_overflow() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, request(1)).unwrap();
    let _ = rx.try_recv().unwrap();

    // stream send window reaches the max
    let inc = (1u32 << 31) - 1 - 65_535;
    peer.send(&session, frames::window_update(1, inc)).unwrap();
    peer.frames();

    let res = peer.send(&session, frames::settings().initial_window_size(65_536));
    assert!(matches!(res, Err(ConnectionError::WindowValueOverflow)));

    let goaway = get_goaway(peer.frames().into_iter().last().unwrap());
    assert_eq!(goaway.reason(), Reason::FLOW_CONTROL_ERROR);
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn settings_window_decrease() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, frames::settings().initial_window_size(10)).unwrap();
    peer.frames();

    peer.send(&session, request(1).eos()).unwrap();
    let msg = rx.try_recv().unwrap();
    let stream = msg.stream().clone();

    let (cb, res) = report();
    stream.send_response(StatusCode::OK, HeaderMap::new(), false, Callback::noop());
    stream.send_data(Bytes::from_static(b"0123456789abcdefghij"), true, cb);

    let mut frames = peer.frames().into_iter();
    let _ = get_headers(frames.next().unwrap());
    assert_eq!(get_data(frames.next().unwrap()).payload(), &b"0123456789"[..]);
    assert!(frames.next().is_none());

    // window is exhausted, lowering the setting makes it negative
    peer.send(&session, frames::settings().initial_window_size(0)).unwrap();
    peer.send(&session, frames::window_update(1, 10)).unwrap();
    assert!(peer
        .frames()
        .into_iter()
        .all(|frm| !matches!(frm, Frame::Data(_))));
    assert!(res.try_recv().is_err());

    peer.send(&session, frames::window_update(1, 5)).unwrap();
    let data = get_data(peer.frames().into_iter().next().unwrap());
    assert_eq!(data.payload(), &b"abcde"[..]);
    assert!(!data.is_end_stream());

    peer.send(&session, frames::window_update(1, 5)).unwrap();
    let data = get_data(peer.frames().into_iter().next().unwrap());
    assert_eq!(data.payload(), &b"fghij"[..]);
    assert!(data.is_end_stream());
    assert!(res.try_recv().unwrap().is_ok());
}

#[test]
fn closed_session_reaped_after_flush() {
    let (session, peer, _rx) = start_server(Config::new());

    peer.pipe.hold();
    let res = peer.send(&session, frames::window_update(0, u32::MAX >> 1));
    assert!(matches!(res, Err(ConnectionError::WindowValueOverflow)));
    assert_eq!(session.state(), SessionState::Closed);

    // GOAWAY is still in flight
    assert!(!session.on_idle_timeout());

    peer.pipe.release();
    assert!(session.on_idle_timeout());
    let goaway = get_goaway(peer.frames().into_iter().last().unwrap());
    assert_eq!(goaway.reason(), Reason::FLOW_CONTROL_ERROR);
}

#[test]
fn idle_timeout_disabled() {
    let (session, _peer, _rx) = start_server(Config::new().set_idle_timeout(Seconds(0)));
    assert!(!session.on_idle_timeout());
    assert_eq!(session.state(), SessionState::Open);
}

#[test]
fn flush_failure() {
    let _ = env_logger::try_init();

    let (service, events) = controls();
    let (listener, rx) = collect();
    let pipe = Arc::new(Pipe::default());
    let session = server::ServerBuilder::new()
        .control(service)
        .finish(listener)
        .handshake(pipe.clone());
    let peer = Peer::new(pipe.clone());

    let mut buf = BytesMut::from(PREFACE);
    buf.extend_from_slice(&peer.encode(frames::settings()));
    buf.extend_from_slice(&peer.encode(request(1).eos()));
    session.recv(&mut buf).unwrap();
    peer.frames();
    let msg = rx.try_recv().unwrap();

    pipe.break_pipe();
    let (cb, res) = report();
    msg.stream()
        .send_response(StatusCode::OK, HeaderMap::new(), true, cb);

    assert!(matches!(res.try_recv().unwrap(), Err(OperationError::Io(_))));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(events.try_recv().unwrap(), "peer-gone");
    assert_eq!(events.try_recv().unwrap(), "terminated");

    // operations on closed session fail
    let (cb, res) = report();
    session.ping(cb);
    assert!(matches!(res.try_recv().unwrap(), Err(OperationError::Closed)));
}

#[test]
fn local_reset_ignores_frames() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, request(1)).unwrap();
    let msg = rx.try_recv().unwrap();
    let stream = msg.stream().clone();

    stream.reset(Reason::CANCEL);
    let rst = get_reset(peer.frames().into_iter().next().unwrap());
    assert_eq!(rst.stream_id(), 1);
    assert_eq!(rst.reason(), Reason::CANCEL);

    let mut msg = rx.try_recv().unwrap();
    assert!(matches!(
        msg.kind().take(),
        MessageKind::Disconnect(OperationError::Reset(Reason::CANCEL))
    ));

    peer.send(&session, frames::data(1, "late")).unwrap();
    assert!(peer.frames().is_empty());
    assert!(rx.try_recv().is_err());
    assert_eq!(session.state(), SessionState::Open);
}

#[test]
fn remote_reset() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, request(1)).unwrap();
    let _ = rx.try_recv().unwrap();

    peer.send(&session, frames::reset(1).cancel()).unwrap();
    let mut msg = rx.try_recv().unwrap();
    assert!(matches!(
        msg.kind().take(),
        MessageKind::Disconnect(OperationError::RemoteReset(Reason::CANCEL))
    ));
    assert_eq!(session.active_streams(), 0);
}

#[test]
fn server_push() {
    let (session, peer, rx) = start_server(Config::new());
    assert!(session.is_push_enabled());

    peer.send(&session, request(1).eos()).unwrap();
    let msg = rx.try_recv().unwrap();

    let (tx, pushed) = mpsc::channel();
    let uri = "https://example.com/style.css".parse().unwrap();
    let pseudo = PseudoHeaders::request(Method::GET, uri);
    msg.stream().push(
        pseudo,
        HeaderMap::new(),
        Arc::new(DefaultStreamListener),
        Promise::new(move |res: Result<StreamRef, OperationError>| {
            let _ = tx.send(res);
        }),
    );
    let pushed = pushed.try_recv().unwrap().unwrap();
    assert_eq!(pushed.id(), 2);

    match peer.frames().into_iter().next() {
        Some(Frame::PushPromise(p)) => {
            assert_eq!(p.stream_id(), 1);
            assert_eq!(p.promised_id(), 2);
            assert_eq!(p.pseudo().path, Some("/style.css".into()));
        }
        frm => panic!("unexpected frame {:?}", frm),
    }

    pushed.send_response(StatusCode::OK, HeaderMap::new(), true, Callback::noop());
    let hdrs = get_headers(peer.frames().into_iter().next().unwrap());
    assert_eq!(hdrs.stream_id(), 2);
}

#[test]
fn server_push_disabled() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, frames::settings().disable_push()).unwrap();
    assert!(!session.is_push_enabled());

    peer.send(&session, request(1).eos()).unwrap();
    let msg = rx.try_recv().unwrap();

    let (tx, pushed) = mpsc::channel();
    let uri = "https://example.com/style.css".parse().unwrap();
    let pseudo = PseudoHeaders::request(Method::GET, uri);
    msg.stream().push(
        pseudo,
        HeaderMap::new(),
        Arc::new(DefaultStreamListener),
        Promise::new(move |res: Result<StreamRef, OperationError>| {
            let _ = tx.send(res);
        }),
    );
    assert!(matches!(
        pushed.try_recv().unwrap(),
        Err(OperationError::PushDisabled)
    ));
}

#[test]
fn client_request() {
    let (client, peer) = start_client();

    let (listener, rx) = collect();
    let stream = client
        .send_request(Method::GET, "/index.html".into(), HeaderMap::new(), true, listener)
        .unwrap();
    assert_eq!(stream.id(), 1);
    assert_eq!(client.active_streams(), 1);

    let hdrs = get_headers(peer.frames().into_iter().next().unwrap());
    assert_eq!(hdrs.stream_id(), 1);
    assert!(hdrs.is_end_stream());
    assert_eq!(hdrs.pseudo().method, Some(Method::GET));
    assert_eq!(hdrs.pseudo().path, Some("/index.html".into()));
    assert_eq!(hdrs.pseudo().authority, Some("localhost".into()));

    peer.send(client.session(), frames::headers(1).response(200)).unwrap();
    peer.send(client.session(), frames::data(1, "hello").eos()).unwrap();

    let mut msg = rx.try_recv().unwrap();
    let (pseudo, _, eof) = get_message_headers!(msg);
    assert_eq!(pseudo.status, Some(StatusCode::OK));
    assert!(!eof);

    let mut msg = rx.try_recv().unwrap();
    match msg.kind().take() {
        MessageKind::Eof(StreamEof::Data(data)) => assert_eq!(data, Bytes::from_static(b"hello")),
        kind => panic!("unexpected message {:?}", kind),
    }
    assert_eq!(client.active_streams(), 0);

    client.close();
    assert!(client.is_closed());
}

#[test]
fn client_respects_concurrency_limit() {
    let (client, peer) = start_client();
    peer.send(client.session(), frames::settings().max_concurrent_streams(1))
        .unwrap();

    let (listener, _rx) = collect();
    client
        .send_request(Method::GET, "/".into(), HeaderMap::new(), true, listener)
        .unwrap();
    let (listener, _rx) = collect();
    assert!(matches!(
        client.send_request(Method::GET, "/".into(), HeaderMap::new(), true, listener),
        Err(OperationError::Concurrency)
    ));
}

#[test]
fn upgrade() {
    let _ = env_logger::try_init();

    let (listener, rx) = collect();
    let pipe = Arc::new(Pipe::default());
    let session = server::ServerBuilder::new()
        .finish(listener)
        .handshake(pipe.clone());
    let peer = Peer::new(pipe);
    peer.frames();

    let pseudo = PseudoHeaders::request(Method::GET, "http://example.com/".parse().unwrap());
    let stream =
        server::upgrade(&session, "AAMAAABkAARAAAAAAAIAAAAA", pseudo, HeaderMap::new()).unwrap();
    assert_eq!(stream.id(), 1);
    assert!(!session.is_push_enabled());

    let mut msg = rx.try_recv().unwrap();
    let (pseudo, _, eof) = get_message_headers!(msg);
    assert_eq!(pseudo.path, Some("/".into()));
    assert!(eof);

    // client preface still follows the 101 response
    let mut buf = BytesMut::from(PREFACE);
    buf.extend_from_slice(&peer.encode(frames::settings()));
    session.recv(&mut buf).unwrap();
    peer.frames();

    stream.send_response(StatusCode::OK, HeaderMap::new(), true, Callback::noop());
    let hdrs = get_headers(peer.frames().into_iter().next().unwrap());
    assert_eq!(hdrs.stream_id(), 1);
}

#[test]
fn read_from_reader() {
    let _ = env_logger::try_init();

    let (listener, rx) = collect();
    let pipe = Arc::new(Pipe::default());
    let session = server::ServerBuilder::new()
        .finish(listener)
        .handshake(pipe.clone());
    let peer = Peer::new(pipe);

    let mut buf = BytesMut::from(PREFACE);
    buf.extend_from_slice(&peer.encode(frames::settings()));
    buf.extend_from_slice(&peer.encode(request(1)));
    session.read_from(Cursor::new(buf.to_vec())).unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    let _ = rx.try_recv().unwrap();
    let mut msg = rx.try_recv().unwrap();
    assert!(matches!(
        msg.kind().take(),
        MessageKind::Disconnect(OperationError::Closed)
    ));
}

#[test]
fn connection_window_updates() {
    let (session, _peer, _rx) = start_server(Config::new());

    assert_eq!(session.update_send_window(100).unwrap(), 65_535);
    assert_eq!(session.send_window(), 65_635);
    assert!(matches!(
        session.update_send_window(i32::MAX),
        Err(OperationError::FlowControl)
    ));
    assert_eq!(session.send_window(), 65_635);

    let recv = session.recv_window();
    assert_eq!(session.update_recv_window(-10).unwrap(), recv);
    assert_eq!(session.recv_window(), recv - 10);
}

#[test]
fn injected_data_ack() {
    let (session, _peer, rx) = start_server(Config::new());

    session.on_frame(request(1).into()).unwrap();
    let _ = rx.try_recv().unwrap();

    let (ack, res) = report();
    let data = frame::Data::new(1.into(), Bytes::from_static(b"hello"));
    session.on_data(data, ack).unwrap();

    let mut msg = rx.try_recv().unwrap();
    let cap = match msg.kind().take() {
        MessageKind::Data(payload, cap) => {
            assert_eq!(payload, Bytes::from_static(b"hello"));
            cap
        }
        kind => panic!("unexpected message {:?}", kind),
    };
    assert!(res.try_recv().is_err());

    cap.consume();
    assert!(res.try_recv().unwrap().is_ok());
}

#[test]
fn injected_window_update() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, frames::settings().initial_window_size(5)).unwrap();
    peer.frames();

    peer.send(&session, request(1).eos()).unwrap();
    let stream = rx.try_recv().unwrap().stream().clone();

    let (cb, res) = report();
    stream.send_response(StatusCode::OK, HeaderMap::new(), false, Callback::noop());
    stream.send_data(Bytes::from_static(b"0123456789"), true, cb);

    let mut frames = peer.frames().into_iter();
    let _ = get_headers(frames.next().unwrap());
    assert_eq!(get_data(frames.next().unwrap()).payload(), &b"01234"[..]);

    session
        .on_window_update(Some(&stream), frame::WindowUpdate::new(1.into(), 5))
        .unwrap();
    let data = get_data(peer.frames().into_iter().next().unwrap());
    assert_eq!(data.payload(), &b"56789"[..]);
    assert!(data.is_end_stream());
    assert!(res.try_recv().unwrap().is_ok());

    assert!(matches!(
        session.on_window_update(None, frame::WindowUpdate::new(0.into(), u32::MAX >> 1)),
        Err(ConnectionError::WindowValueOverflow)
    ));
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn abort() {
    let (session, peer, rx) = start_server(Config::new());

    peer.send(&session, request(1)).unwrap();
    let _ = rx.try_recv().unwrap();

    session.abort(Reason::INTERNAL_ERROR);
    assert_eq!(session.state(), SessionState::Closed);

    let goaway = get_goaway(peer.frames().into_iter().last().unwrap());
    assert_eq!(goaway.reason(), Reason::INTERNAL_ERROR);
    assert_eq!(goaway.last_stream_id(), 1);

    let mut msg = rx.try_recv().unwrap();
    assert!(matches!(
        msg.kind().take(),
        MessageKind::Disconnect(OperationError::GoAway(Reason::INTERNAL_ERROR))
    ));
}
