use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use std::{fmt, io, mem, panic, panic::AssertUnwindSafe};

use nanorand::{Rng, WyRand};
use ntex_bytes::BytesMut;
use ntex_codec::{Decoder, Encoder};
use ntex_http::HeaderMap;
use ntex_util::HashMap;

use crate::callback::{Callback, Promise};
use crate::codec::Codec;
use crate::control::{Control, ControlAck, ControlService};
use crate::error::{ConnectionError, OperationError, StreamError};
use crate::exec::Flusher;
use crate::frame::{self, Data, Frame, PseudoHeaders, PushPromise, Reason, Reset, StreamId};
use crate::frame::{WindowSize, WindowUpdate};
use crate::message::{Message, MessageKind, StreamEof, StreamListener};
use crate::queue::{Entry, Queue};
use crate::stream::{Capacity, HeadersKind, StreamFlags, StreamInner, StreamRef};
use crate::stream::{StreamState, StreamStatus};
use crate::{config::Config, consts, exec::panic_message, window::Window};

type Payload = [u8; 8];

/// Session role
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Session lifecycle state
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// Local GOAWAY is sent, existing streams proceed
    GoingAwayLocal,
    /// Remote GOAWAY is received, existing streams proceed
    GoingAwayRemote,
    Closed,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug)]
    struct Flags: u8 {
        const WAITING_ACK     = 0b0000_0001;
        const SEND_PREFACE    = 0b0000_0010;
        const EXPECT_PREFACE  = 0b0000_0100;
        const EXPECT_SETTINGS = 0b0000_1000;
        const FLUSHING        = 0b0001_0000;
        const SHUTDOWN        = 0b0010_0000;
    }
}

/// HTTP/2 session
///
/// Frames enter through `recv`, stream events are published to stream
/// listeners, connection events go to the control service. Outbound frames
/// are queued and written through the flusher, at most one flush is in
/// flight at any time.
#[derive(Clone)]
pub struct Session(Arc<SessionShared>);

pub(crate) struct SessionShared {
    inner: Mutex<SessionInner>,
    flusher: Arc<dyn Flusher>,
    control: Arc<dyn ControlService>,
}

struct SessionInner {
    role: Role,
    state: SessionState,
    flags: Flags,
    config: Config,
    codec: Codec,
    weak: Weak<SessionShared>,
    listener: Arc<dyn StreamListener>,
    streams: HashMap<StreamId, StreamInner>,
    queue: Queue,
    /// Callbacks of the flush in flight
    inflight: Vec<Callback>,
    send_window: Window,
    recv_window: Window,
    recv_pending: WindowSize,
    remote_init_window: WindowSize,
    remote_max_concurrent: Option<u32>,
    remote_push_enabled: bool,
    last_remote_id: StreamId,
    next_local_id: Option<StreamId>,
    reset_streams: VecDeque<(StreamId, Instant)>,
    pings: VecDeque<(Payload, Callback)>,
    pending_controls: usize,
    bytes_written: u64,
    last_activity: Instant,
    goaway_deadline: Option<Instant>,
}

/// Side effects collected under the session lock, executed after release
#[derive(Default)]
struct Effects {
    messages: Vec<(Arc<dyn StreamListener>, Message)>,
    controls: Vec<Control>,
    callbacks: Vec<(Callback, Result<(), OperationError>)>,
    promises: Vec<(Promise<StreamRef>, Result<StreamRef, OperationError>)>,
}

impl Effects {
    fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.controls.is_empty()
            && self.callbacks.is_empty()
            && self.promises.is_empty()
    }
}

impl Session {
    /// Create session and queue the handshake
    pub fn new(
        role: Role,
        config: Config,
        flusher: Arc<dyn Flusher>,
        listener: Arc<dyn StreamListener>,
        control: Arc<dyn ControlService>,
    ) -> Session {
        let shared = Arc::new_cyclic(|weak| SessionShared {
            flusher,
            control,
            inner: Mutex::new(SessionInner::new(role, config, weak.clone(), listener)),
        });
        let session = Session(shared);
        session.flush();
        session
    }

    pub(crate) fn from_shared(shared: Arc<SessionShared>) -> Session {
        Session(shared)
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionShared> {
        Arc::downgrade(&self.0)
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.0.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut SessionInner, &mut Effects) -> R,
    {
        let mut eff = Effects::default();
        let res = {
            let mut inner = self.inner();
            f(&mut *inner, &mut eff)
        };
        self.process(eff);
        res
    }

    /// Session role
    pub fn role(&self) -> Role {
        self.inner().role
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    /// Feed received bytes, decoded frames are removed from `src`.
    ///
    /// Returns an error if the session is closed because of a protocol error,
    /// the GOAWAY frame is queued already.
    pub fn recv(&self, src: &mut BytesMut) -> Result<(), ConnectionError> {
        self.with(|inner, eff| inner.recv(src, eff))
    }

    /// Inject a frame as if it was received from the peer
    pub fn on_frame(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.with(|inner, eff| inner.inject(|inner, eff| inner.recv_frame(frame, eff), eff))
    }

    /// Inject a DATA frame, `ack` completes once the application consumed it.
    pub fn on_data(&self, data: Data, ack: Callback) -> Result<(), ConnectionError> {
        self.with(|inner, eff| inner.inject(|inner, eff| inner.recv_data(data, ack, eff), eff))
    }

    /// Apply WINDOW_UPDATE to `stream` or to the connection if `stream` is `None`
    pub fn on_window_update(
        &self,
        stream: Option<&StreamRef>,
        frame: WindowUpdate,
    ) -> Result<(), ConnectionError> {
        let id = stream.map(|s| s.id()).unwrap_or(StreamId::CON);
        let inc = frame.size_increment();
        self.with(|inner, eff| inner.inject(|inner, eff| inner.window_update(id, inc, eff), eff))
    }

    /// Peer closed its outbound half
    pub fn on_shutdown(&self) {
        self.with(|inner, eff| {
            log::trace!("peer is gone, session state: {:?}", inner.state);
            match inner.state {
                SessionState::Open => {
                    inner.control(Control::peer_gone(None), eff);
                    inner.terminate(OperationError::Closed, eff);
                }
                SessionState::GoingAwayLocal => inner.terminate(OperationError::Closed, eff),
                SessionState::GoingAwayRemote | SessionState::Closed => (),
            }
        })
    }

    /// Check session expiration, returns `true` if the session can be reaped.
    pub fn on_idle_timeout(&self) -> bool {
        self.with(|inner, eff| {
            let now = Instant::now();
            match inner.state {
                SessionState::Open => {
                    let timeout = Duration::from(inner.config.idle_timeout);
                    if !timeout.is_zero() && now >= inner.last_activity + timeout {
                        log::debug!("session is idle for {:?}, closing", timeout);
                        inner.connection_error(ConnectionError::IdleTimeout, eff);
                        true
                    } else {
                        false
                    }
                }
                SessionState::GoingAwayLocal | SessionState::GoingAwayRemote => {
                    if inner.goaway_deadline.map(|d| now >= d).unwrap_or(true) {
                        log::debug!("goaway grace period is expired");
                        inner.terminate(OperationError::GoAway(Reason::NO_ERROR), eff);
                        true
                    } else {
                        false
                    }
                }
                // closed, but the last frames may still be on the wire
                SessionState::Closed => !inner.flags.contains(Flags::FLUSHING),
            }
        })
    }

    /// Flush completion
    pub fn on_flushed(&self, res: io::Result<usize>) {
        self.with(|inner, eff| {
            inner.flags.remove(Flags::FLUSHING);
            let callbacks = mem::take(&mut inner.inflight);
            match res {
                Ok(n) => {
                    inner.bytes_written += n as u64;
                    inner.last_activity = Instant::now();
                    eff.callbacks.extend(callbacks.into_iter().map(|cb| (cb, Ok(()))));
                    inner.sweep();
                    inner.check_close(eff);
                }
                Err(e) => {
                    log::debug!("flush failed: {}", e);
                    let peer_err = io::Error::new(e.kind(), e.to_string());
                    let err = OperationError::from(e);
                    eff.callbacks
                        .extend(callbacks.into_iter().map(|cb| (cb, Err(err.clone()))));
                    if inner.state != SessionState::Closed {
                        inner.control(Control::peer_gone(Some(peer_err)), eff);
                    }
                    inner.terminate(err, eff);
                    // nothing can be written anymore
                    while inner.queue.pop_control().is_some() {}
                }
            }
        })
    }

    /// Stream handle, if the stream exists
    pub fn get_stream(&self, id: StreamId) -> Option<StreamRef> {
        let inner = self.inner();
        if inner.streams.contains_key(&id) {
            Some(inner.stream_ref(id))
        } else {
            None
        }
    }

    pub(crate) fn stream_state(&self, id: StreamId) -> Option<StreamState> {
        self.inner().streams.get(&id).map(|s| s.state())
    }

    /// Forget the stream, queued frames are dropped, no RST_STREAM is sent.
    ///
    /// Returns `false` if the stream is already removed.
    pub fn remove_stream(&self, stream: &StreamRef) -> bool {
        self.with(|inner, eff| {
            let id = stream.id();
            if inner.streams.remove(&id).is_some() {
                inner.fail_queued(id, OperationError::Closed, eff);
                inner.check_close(eff);
                true
            } else {
                false
            }
        })
    }

    /// Queue frames of one stream, `cb` completes after the last frame is flushed.
    ///
    /// Frames are validated against the stream state as a whole, nothing is
    /// queued if any of them is not allowed.
    pub fn enqueue_frames(&self, stream: &StreamRef, frames: Vec<Frame>, cb: Callback) {
        self.with(|inner, eff| inner.enqueue_frames(stream.id(), frames, cb, eff))
    }

    /// Queue DATA frame, the frame is split according to flow control and
    /// max frame size.
    pub fn enqueue_data(&self, stream: &StreamRef, data: Data, cb: Callback) {
        self.with(|inner, eff| inner.enqueue_frames(stream.id(), vec![data.into()], cb, eff))
    }

    /// Reserve a pushed stream and queue the PUSH_PROMISE frame
    ///
    /// The promised stream id is allocated under the session lock together
    /// with the enqueue, the stream is delivered to `promise`.
    pub fn push(
        &self,
        parent: &StreamRef,
        frame: PushPromise,
        listener: Arc<dyn StreamListener>,
        promise: Promise<StreamRef>,
    ) {
        self.with(|inner, eff| match inner.push(parent.id(), frame, listener) {
            Ok(stream) => eff.promises.push((promise, Ok(stream))),
            Err(err) => eff.promises.push((promise, Err(err))),
        })
    }

    /// Open a new stream and queue request HEADERS
    pub fn send_request(
        &self,
        pseudo: PseudoHeaders,
        headers: HeaderMap,
        eof: bool,
        listener: Arc<dyn StreamListener>,
    ) -> Result<StreamRef, OperationError> {
        self.with(|inner, _| inner.send_request(pseudo, headers, eof, listener))
    }

    /// Reset the stream
    pub fn reset_stream(&self, id: StreamId, reason: Reason) {
        self.with(|inner, eff| inner.reset_stream(id, reason, eff))
    }

    /// Adjust connection send window, returns previous value
    pub fn update_send_window(&self, delta: i32) -> Result<i32, OperationError> {
        let mut inner = self.inner();
        let prev = inner.send_window.value();
        inner.send_window = inner
            .send_window
            .apply(delta)
            .map_err(|_| OperationError::FlowControl)?;
        Ok(prev)
    }

    /// Adjust connection receive window, returns previous value
    pub fn update_recv_window(&self, delta: i32) -> Result<i32, OperationError> {
        let mut inner = self.inner();
        let prev = inner.recv_window.value();
        inner.recv_window = inner
            .recv_window
            .apply(delta)
            .map_err(|_| OperationError::FlowControl)?;
        Ok(prev)
    }

    /// Connection send window
    pub fn send_window(&self) -> i32 {
        self.inner().send_window.value()
    }

    /// Connection receive window
    pub fn recv_window(&self) -> i32 {
        self.inner().recv_window.value()
    }

    /// Can streams be pushed on this session
    pub fn is_push_enabled(&self) -> bool {
        let inner = self.inner();
        match inner.role {
            Role::Server => inner.remote_push_enabled,
            Role::Client => inner.config.settings.is_push_enabled().unwrap_or(false),
        }
    }

    /// Number of bytes written to the flusher
    pub fn bytes_written(&self) -> u64 {
        self.inner().bytes_written
    }

    /// Number of active streams
    pub fn active_streams(&self) -> usize {
        self.inner().streams.len()
    }

    /// Send PING, `cb` completes when the peer acknowledges it
    pub fn ping(&self, cb: Callback) {
        self.with(|inner, eff| {
            if inner.state == SessionState::Closed {
                eff.callbacks.push((cb, Err(OperationError::Closed)));
            } else {
                let payload = WyRand::new().generate::<u64>().to_be_bytes();
                inner.pings.push_back((payload, cb));
                inner.queue.push_control(frame::Ping::new(payload).into());
            }
        })
    }

    /// Graceful close, sends GOAWAY and waits for existing streams
    pub fn close(&self) {
        self.with(|inner, eff| {
            if inner.state == SessionState::Open {
                log::trace!("closing session, last stream {:?}", inner.last_remote_id);
                inner.state = SessionState::GoingAwayLocal;
                let grace = Duration::from(inner.config.goaway_grace);
                inner.goaway_deadline = Some(Instant::now() + grace);
                inner.queue.push_control(
                    frame::GoAway::new(Reason::NO_ERROR)
                        .set_last_stream_id(inner.last_remote_id)
                        .into(),
                );
                inner.check_close(eff);
            }
        })
    }

    /// Close session immediately with GOAWAY
    pub fn abort(&self, reason: Reason) {
        self.with(|inner, eff| {
            if inner.state != SessionState::Closed {
                inner.queue.push_control(
                    frame::GoAway::new(reason)
                        .set_last_stream_id(inner.last_remote_id)
                        .into(),
                );
                inner.terminate(OperationError::GoAway(reason), eff);
            }
        })
    }

    /// Read loop over a blocking reader
    ///
    /// Returns once the peer closes the connection or the session is closed.
    /// Read timeouts (`WouldBlock`, `TimedOut`) are used to check expiration
    /// of the session.
    pub fn read_from<R: io::Read>(&self, mut io: R) -> Result<(), OperationError> {
        let mut buf = BytesMut::with_capacity(consts::READ_BUF_SIZE);
        let mut chunk = vec![0u8; consts::READ_BUF_SIZE];

        loop {
            if self.state() == SessionState::Closed {
                return Ok(());
            }
            match io.read(&mut chunk) {
                Ok(0) => {
                    log::trace!("peer closed connection");
                    self.on_shutdown();
                    return Ok(());
                }
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    self.recv(&mut buf)?;
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::Interrupted => continue,
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                        if self.on_idle_timeout() {
                            return Ok(());
                        }
                    }
                    _ => {
                        log::debug!("read failed: {}", e);
                        self.on_shutdown();
                        return Err(e.into());
                    }
                },
            }
        }
    }

    pub(crate) fn release_capacity(&self, id: StreamId, size: WindowSize) {
        self.with(|inner, _| inner.release_capacity(id, size))
    }

    /// Execute side effects outside of the session lock
    fn process(&self, mut eff: Effects) {
        while !eff.is_empty() {
            let Effects {
                messages,
                controls,
                callbacks,
                promises,
            } = mem::take(&mut eff);

            for (listener, msg) in messages {
                let stream = msg.stream().clone();
                let res = panic::catch_unwind(AssertUnwindSafe(|| listener.on_message(msg)))
                    .unwrap_or_else(|e| Err(panic_message(&*e).into()));
                if let Err(err) = res {
                    log::debug!("stream {:?} listener failed: {}", stream.id(), err);
                    let mut inner = self.inner();
                    inner.control(Control::app_error(err, stream), &mut eff);
                }
            }
            for ctl in controls {
                let ack = self.on_control(ctl);
                self.inner().apply_ack(ack, &mut eff);
            }
            for (cb, res) in callbacks {
                cb.complete(res);
            }
            for (promise, res) in promises {
                match res {
                    Ok(stream) => promise.succeed(stream),
                    Err(err) => promise.fail(err),
                }
            }
        }
        self.flush();
    }

    fn on_control(&self, ctl: Control) -> ControlAck {
        let control = self.0.control.clone();
        panic::catch_unwind(AssertUnwindSafe(move || control.on_control(ctl))).unwrap_or_else(|e| {
            log::error!("control service panicked: {}", panic_message(&*e));
            ControlAck::disconnect()
        })
    }

    /// Write queued frames if no flush is in flight
    fn flush(&self) {
        let (buf, callbacks, shutdown) = {
            let mut inner = self.inner();
            if inner.flags.contains(Flags::FLUSHING) {
                return;
            }
            let (buf, callbacks) = inner.prepare_flush();
            if buf.is_empty() {
                let shutdown = inner.state == SessionState::Closed
                    && inner.pending_controls == 0
                    && !inner.flags.contains(Flags::SHUTDOWN);
                if shutdown {
                    inner.flags.insert(Flags::SHUTDOWN);
                }
                (None, callbacks, shutdown)
            } else {
                inner.flags.insert(Flags::FLUSHING);
                inner.inflight = callbacks;
                (Some(buf), Vec::new(), false)
            }
        };

        for cb in callbacks {
            cb.succeed();
        }
        if let Some(buf) = buf {
            let len = buf.len();
            let weak = Arc::downgrade(&self.0);
            log::trace!("flushing {}B", len);
            self.0.flusher.flush(
                buf.freeze(),
                Box::new(move |res| {
                    if let Some(shared) = weak.upgrade() {
                        Session(shared).on_flushed(res.map(|_| len))
                    }
                }),
            );
        } else if shutdown {
            log::trace!("session is closed, shutdown flusher");
            self.0.flusher.shutdown();
        }
    }
}

impl SessionInner {
    fn new(
        role: Role,
        config: Config,
        weak: Weak<SessionShared>,
        listener: Arc<dyn StreamListener>,
    ) -> Self {
        let codec = Codec::default();
        codec.set_recv_frame_size(config.max_frame_size());
        codec.set_recv_header_list_size(config.max_header_list_size());
        codec.set_recv_continuations(config.max_header_continuations);

        let mut queue = Queue::default();
        queue.push_control(config.settings.clone().into());
        let conn_window = config.connection_window_sz;
        if conn_window > frame::DEFAULT_INITIAL_WINDOW_SIZE {
            queue.push_control(
                WindowUpdate::new(
                    StreamId::CON,
                    conn_window - frame::DEFAULT_INITIAL_WINDOW_SIZE,
                )
                .into(),
            );
        }

        let mut flags = Flags::WAITING_ACK | Flags::EXPECT_SETTINGS;
        let next_local_id = match role {
            Role::Client => {
                flags.insert(Flags::SEND_PREFACE);
                StreamId::from(1)
            }
            Role::Server => {
                flags.insert(Flags::EXPECT_PREFACE);
                StreamId::from(2)
            }
        };

        SessionInner {
            role,
            codec,
            flags,
            queue,
            weak,
            listener,
            state: SessionState::Open,
            streams: HashMap::default(),
            inflight: Vec::new(),
            send_window: Window::new(frame::DEFAULT_INITIAL_WINDOW_SIZE as i32),
            recv_window: Window::new(conn_window as i32),
            recv_pending: 0,
            remote_init_window: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            remote_max_concurrent: None,
            remote_push_enabled: true,
            last_remote_id: StreamId::CON,
            next_local_id: Some(next_local_id),
            reset_streams: VecDeque::new(),
            pings: VecDeque::new(),
            pending_controls: 0,
            bytes_written: 0,
            last_activity: Instant::now(),
            goaway_deadline: None,
            config,
        }
    }

    fn stream_ref(&self, id: StreamId) -> StreamRef {
        StreamRef::new(id, self.weak.clone())
    }

    fn is_local(&self, id: StreamId) -> bool {
        match self.role {
            Role::Client => id.is_client_initiated(),
            Role::Server => id.is_server_initiated(),
        }
    }

    /// Stream id is not used yet
    fn is_idle(&self, id: StreamId) -> bool {
        if self.is_local(id) {
            self.next_local_id.map(|next| id >= next).unwrap_or(false)
        } else {
            id > self.last_remote_id
        }
    }

    fn control(&mut self, ctl: Control, eff: &mut Effects) {
        self.pending_controls += 1;
        eff.controls.push(ctl);
    }

    fn notify(
        &self,
        id: StreamId,
        listener: Arc<dyn StreamListener>,
        kind: MessageKind,
        eff: &mut Effects,
    ) {
        eff.messages.push((listener, Message::new(self.stream_ref(id), kind)));
    }

    fn recv(&mut self, src: &mut BytesMut, eff: &mut Effects) -> Result<(), ConnectionError> {
        if self.state == SessionState::Closed {
            log::trace!("session is closed, drop {}B", src.len());
            src.clear();
            return Ok(());
        }

        if self.flags.contains(Flags::EXPECT_PREFACE) {
            match crate::server::read_preface(src) {
                Ok(true) => self.flags.remove(Flags::EXPECT_PREFACE),
                Ok(false) => return Ok(()),
                Err(err) => {
                    self.connection_error(err.clone(), eff);
                    return Err(err);
                }
            }
        }

        loop {
            match self.codec.decode(src) {
                Ok(Some(frame)) => {
                    log::trace!("received frame {:?}", frame);
                    self.last_activity = Instant::now();
                    if let Err(err) = self.recv_frame(frame, eff) {
                        self.connection_error(err.clone(), eff);
                        return Err(err);
                    }
                    if self.state == SessionState::Closed {
                        src.clear();
                        return Ok(());
                    }
                }
                Ok(None) => return Ok(()),
                Err(err) => match err.stream_id() {
                    Some(id) => {
                        let kind = match err {
                            frame::FrameError::InvalidDependencyId(_) => {
                                StreamError::SelfDependency
                            }
                            _ => StreamError::Malformed,
                        };
                        if !self.is_local(id) && id > self.last_remote_id {
                            self.last_remote_id = id;
                        }
                        self.stream_error(id, kind, eff);
                    }
                    None => {
                        let err = ConnectionError::Decoder(err);
                        self.connection_error(err.clone(), eff);
                        return Err(err);
                    }
                },
            }
        }
    }

    /// Run injected frame handler, connection errors close the session
    fn inject<F>(&mut self, f: F, eff: &mut Effects) -> Result<(), ConnectionError>
    where
        F: FnOnce(&mut SessionInner, &mut Effects) -> Result<(), ConnectionError>,
    {
        if self.state == SessionState::Closed {
            return Err(ConnectionError::GoAway(Reason::NO_ERROR));
        }
        self.last_activity = Instant::now();
        let res = f(self, eff);
        if let Err(ref err) = res {
            self.connection_error(err.clone(), eff);
        }
        res
    }

    fn recv_frame(&mut self, frame: Frame, eff: &mut Effects) -> Result<(), ConnectionError> {
        if self.flags.contains(Flags::EXPECT_SETTINGS) {
            match frame {
                Frame::Settings(ref s) if !s.is_ack() => (),
                Frame::Preface(_) => (),
                _ => {
                    proto_err!(conn: "expected SETTINGS frame, got {:?}", frame);
                    return Err(ConnectionError::InvalidPreface);
                }
            }
            self.flags.remove(Flags::EXPECT_SETTINGS);
        }

        match frame {
            Frame::Headers(frm) => self.recv_headers(frm, eff),
            Frame::Data(frm) => self.recv_data(frm, Callback::noop(), eff),
            Frame::Priority(frm) => {
                log::trace!("ignore PRIORITY: {:?}", frm);
                Ok(())
            }
            Frame::Reset(frm) => self.recv_reset(frm, eff),
            Frame::Settings(frm) => self.recv_settings(frm),
            Frame::PushPromise(frm) => self.recv_push_promise(frm, eff),
            Frame::Ping(frm) => {
                self.recv_ping(frm, eff);
                Ok(())
            }
            Frame::GoAway(frm) => {
                self.recv_go_away(frm, eff);
                Ok(())
            }
            Frame::WindowUpdate(frm) => {
                self.window_update(frm.stream_id(), frm.size_increment(), eff)
            }
            Frame::Preface(frm) => self.recv_preface(frm),
        }
    }

    fn recv_headers(
        &mut self,
        frm: frame::Headers,
        eff: &mut Effects,
    ) -> Result<(), ConnectionError> {
        let id = frm.stream_id();
        let eof = frm.is_end_stream();

        if let Some(stream) = self.streams.get_mut(&id) {
            let listener = stream.listener.clone();
            match stream.status.recv_headers(eof) {
                Ok(HeadersKind::Initial) => {
                    let (pseudo, headers) = frm.into_parts();
                    self.notify(id, listener, MessageKind::Headers { pseudo, headers, eof }, eff);
                }
                Ok(HeadersKind::Trailers) => {
                    let trailers = frm.into_fields();
                    self.notify(id, listener, MessageKind::Eof(StreamEof::Trailers(trailers)), eff);
                }
                Err(err) => self.stream_error(id, err, eff),
            }
            self.maybe_remove(id, eff);
            return Ok(());
        }

        if self.is_reset(id) {
            log::trace!("ignore HEADERS for reset stream {:?}", id);
            return Ok(());
        }

        // frames on closed streams
        if !self.is_idle(id) {
            if self.is_local(id) {
                self.stream_error(id, StreamError::Closed, eff);
                return Ok(());
            } else {
                proto_err!(conn: "stream id is not greater than last one; id={:?}", id);
                return Err(ConnectionError::InvalidStreamId(id));
            }
        }

        // new remote stream
        if self.role == Role::Client || !id.is_client_initiated() {
            proto_err!(conn: "unexpected stream id parity; id={:?}", id);
            return Err(ConnectionError::InvalidStreamIdParity(id));
        }
        self.last_remote_id = id;

        if self.state != SessionState::Open {
            log::trace!("session is going away, refuse stream {:?}", id);
            self.stream_error(id, StreamError::Refused, eff);
            return Ok(());
        }
        if let Some(max) = self.config.remote_max_concurrent_streams {
            let active = self.streams.values().filter(|s| s.is_remote()).count();
            if active >= max as usize {
                log::trace!("max concurrent streams reached, refuse stream {:?}", id);
                self.stream_error(id, StreamError::Refused, eff);
                return Ok(());
            }
        }
        if !frm.pseudo().is_valid_request() {
            proto_err!(stream: "malformed request pseudo headers; stream={:?}", id);
            self.stream_error(id, StreamError::Malformed, eff);
            return Ok(());
        }

        let mut stream = StreamInner::new(
            id,
            StreamStatus::new(StreamState::Idle, true),
            self.remote_init_window,
            self.config.window_sz,
            self.listener.clone(),
        );
        match stream.status.recv_headers(eof) {
            Ok(_) => {
                let listener = stream.listener.clone();
                self.streams.insert(id, stream);
                let (pseudo, headers) = frm.into_parts();
                self.notify(id, listener, MessageKind::Headers { pseudo, headers, eof }, eff);
            }
            Err(err) => self.stream_error(id, err, eff),
        }
        Ok(())
    }

    fn recv_data(
        &mut self,
        frm: Data,
        ack: Callback,
        eff: &mut Effects,
    ) -> Result<(), ConnectionError> {
        let id = frm.stream_id();
        let len = frm.flow_len();
        let eof = frm.is_end_stream();
        log::trace!("processing DATA {:?}, len={} eof={}", id, len, eof);

        match self.recv_window.dec(len) {
            Ok(w) => self.recv_window = w,
            Err(_) => {
                proto_err!(conn: "connection window is exceeded; len={}", len);
                eff.callbacks.push((ack, Err(OperationError::FlowControl)));
                return Err(ConnectionError::WindowValueOverflow);
            }
        }

        let stream = match self.streams.get_mut(&id) {
            Some(stream) => stream,
            None => {
                // data is discarded, credit is given back right away
                self.update_connection_window();
                eff.callbacks.push((ack, Err(OperationError::Closed)));
                if self.is_reset(id) {
                    log::trace!("ignore DATA for reset stream {:?}", id);
                    return Ok(());
                } else if self.is_idle(id) {
                    proto_err!(conn: "DATA for idle stream; id={:?}", id);
                    return Err(ConnectionError::UnknownStream(id));
                } else {
                    self.stream_error(id, StreamError::Closed, eff);
                    return Ok(());
                }
            }
        };

        if let Err(err) = stream.status.recv_data(eof) {
            self.update_connection_window();
            eff.callbacks.push((ack, Err(err.into())));
            self.stream_error(id, err, eff);
            return Ok(());
        }
        match stream.recv_window.dec(len) {
            Ok(w) => stream.recv_window = w,
            Err(_) => {
                proto_err!(stream: "stream window is exceeded; stream={:?} len={}", id, len);
                self.update_connection_window();
                eff.callbacks.push((ack, Err(OperationError::FlowControl)));
                self.stream_error(id, StreamError::WindowOverflowed, eff);
                return Ok(());
            }
        }
        stream.recv_pending += len;
        self.recv_pending += len;

        let listener = stream.listener.clone();
        if eof {
            // the last chunk is considered consumed
            self.release_capacity(id, len);
            eff.callbacks.push((ack, Ok(())));
            let payload = frm.into_payload();
            self.notify(id, listener, MessageKind::Eof(StreamEof::Data(payload)), eff);
            self.maybe_remove(id, eff);
        } else {
            let capacity = Capacity::new(self.stream_ref(id), len, ack);
            self.notify(id, listener, MessageKind::Data(frm.into_payload(), capacity), eff);
        }
        Ok(())
    }

    /// Application consumed `size` bytes of received data
    fn release_capacity(&mut self, id: StreamId, size: WindowSize) {
        self.recv_pending = self.recv_pending.saturating_sub(size);
        if self.state == SessionState::Closed {
            return;
        }
        self.update_connection_window();

        let (window_sz, threshold) = (self.config.window_sz, self.config.window_sz_threshold);
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.recv_pending = stream.recv_pending.saturating_sub(size);
            if !stream.status.is_recv_closed() {
                let pending = stream.recv_pending;
                if let Some(inc) = stream.recv_window.update(pending, window_sz, threshold) {
                    log::trace!("stream {:?} window update {}", id, inc);
                    self.queue.push_control(WindowUpdate::new(id, inc).into());
                }
            }
        }
    }

    fn update_connection_window(&mut self) {
        if let Some(inc) = self.recv_window.update(
            self.recv_pending,
            self.config.connection_window_sz,
            self.config.connection_window_sz_threshold,
        ) {
            log::trace!("connection window update {}", inc);
            self.queue.push_control(WindowUpdate::new(StreamId::CON, inc).into());
        }
    }

    fn recv_reset(&mut self, frm: Reset, eff: &mut Effects) -> Result<(), ConnectionError> {
        let id = frm.stream_id();
        let reason = frm.reason();
        log::trace!("processing RST_STREAM {:?}, reason={:?}", id, reason);

        if let Some(stream) = self.streams.remove(&id) {
            self.fail_queued(id, OperationError::RemoteReset(reason), eff);
            let kind = MessageKind::Disconnect(OperationError::RemoteReset(reason));
            self.notify(id, stream.listener, kind, eff);
            self.check_close(eff);
            Ok(())
        } else if self.is_idle(id) {
            proto_err!(conn: "RST_STREAM for idle stream; id={:?}", id);
            Err(ConnectionError::UnknownStream(id))
        } else {
            Ok(())
        }
    }

    fn recv_settings(&mut self, frm: frame::Settings) -> Result<(), ConnectionError> {
        log::trace!("processing incoming SETTINGS: {:#?}", frm);

        if frm.is_ack() {
            if self.flags.contains(Flags::WAITING_ACK) {
                self.flags.remove(Flags::WAITING_ACK);
                Ok(())
            } else {
                // We haven't sent any SETTINGS frames to be ACKed, so
                // this is very bizarre! Remote is either buggy or malicious.
                proto_err!(conn: "received unexpected settings ack");
                Err(ConnectionError::UnexpectedSettingsAck)
            }
        } else {
            self.apply_settings(&frm)?;
            self.queue.push_control(frame::Settings::ack().into());
            Ok(())
        }
    }

    fn recv_preface(&mut self, frm: frame::Preface) -> Result<(), ConnectionError> {
        if self.role != Role::Server {
            proto_err!(conn: "upgrade preface on client session");
            return Err(ConnectionError::UnexpectedConnectionFrame);
        }
        // the 101 response acknowledges upgrade settings
        self.apply_settings(frm.settings())
    }

    fn apply_settings(&mut self, frm: &frame::Settings) -> Result<(), ConnectionError> {
        if let Some(val) = frm.max_frame_size() {
            self.codec.set_send_frame_size(val as usize);
        }
        if let Some(val) = frm.max_concurrent_streams() {
            self.remote_max_concurrent = Some(val);
        }
        if let Some(val) = frm.is_push_enabled() {
            self.remote_push_enabled = val;
        }
        if let Some(val) = frm.header_table_size() {
            log::trace!("peer header table size {}", val);
        }
        if let Some(val) = frm.initial_window_size() {
            let delta = (val as i64 - self.remote_init_window as i64) as i32;
            self.remote_init_window = val;
            for stream in self.streams.values_mut() {
                stream.send_window = stream.send_window.apply(delta).map_err(|_| {
                    proto_err!(conn: "stream window overflow on settings; stream={:?}", stream.id);
                    ConnectionError::WindowValueOverflow
                })?;
            }
        }
        Ok(())
    }

    fn recv_push_promise(
        &mut self,
        frm: PushPromise,
        eff: &mut Effects,
    ) -> Result<(), ConnectionError> {
        let parent = frm.stream_id();
        let promised = frm.promised_id();
        log::trace!("processing PUSH_PROMISE {:?} -> {:?}", parent, promised);

        if self.role == Role::Server || !self.config.settings.is_push_enabled().unwrap_or(false) {
            proto_err!(conn: "unexpected PUSH_PROMISE");
            return Err(ConnectionError::UnexpectedPushPromise);
        }
        if !promised.is_server_initiated() {
            return Err(ConnectionError::InvalidStreamIdParity(promised));
        }
        if promised <= self.last_remote_id {
            proto_err!(conn: "promised id is not greater than last one; id={:?}", promised);
            return Err(ConnectionError::InvalidStreamId(promised));
        }
        self.last_remote_id = promised;

        let listener = match self.streams.get(&parent) {
            Some(stream)
                if matches!(stream.state(), StreamState::Open | StreamState::HalfClosedLocal) =>
            {
                stream.listener.clone()
            }
            Some(_) => {
                self.stream_error(promised, StreamError::Refused, eff);
                return Ok(());
            }
            None if self.is_reset(parent) => {
                self.stream_error(promised, StreamError::Reset(Reason::CANCEL), eff);
                return Ok(());
            }
            None => {
                proto_err!(conn: "PUSH_PROMISE for unknown stream; id={:?}", parent);
                return Err(ConnectionError::UnknownStream(parent));
            }
        };
        if self.state != SessionState::Open {
            self.stream_error(promised, StreamError::Refused, eff);
            return Ok(());
        }

        let stream = StreamInner::new(
            promised,
            StreamStatus::new(StreamState::ReservedRemote, true),
            self.remote_init_window,
            self.config.window_sz,
            listener.clone(),
        );
        self.streams.insert(promised, stream);
        let (pseudo, headers) = frm.into_parts();
        let kind = MessageKind::Push {
            stream: self.stream_ref(promised),
            pseudo,
            headers,
        };
        self.notify(parent, listener, kind, eff);
        Ok(())
    }

    fn recv_ping(&mut self, frm: frame::Ping, eff: &mut Effects) {
        if frm.is_ack() {
            let payload = frm.into_payload();
            if let Some(idx) = self.pings.iter().position(|(p, _)| *p == payload) {
                if let Some((_, cb)) = self.pings.remove(idx) {
                    eff.callbacks.push((cb, Ok(())));
                }
            } else {
                log::trace!("unexpected PING ack {:?}", payload);
            }
        } else {
            self.queue.push_control(frame::Ping::pong(frm.into_payload()).into());
        }
    }

    fn recv_go_away(&mut self, frm: frame::GoAway, eff: &mut Effects) {
        let last = frm.last_stream_id();
        let reason = frm.reason();
        log::trace!("processing GOAWAY, last={:?} reason={:?}", last, reason);
        if let Some(msg) = frm.debug_str() {
            log::debug!("peer is going away: {}", msg);
        }

        if self.state == SessionState::Open {
            self.state = SessionState::GoingAwayRemote;
            self.goaway_deadline = Some(Instant::now() + Duration::from(self.config.goaway_grace));
        }

        // local streams above last id are not processed by the peer
        let mut ids: Vec<_> = self
            .streams
            .keys()
            .copied()
            .filter(|id| self.is_local(*id) && *id > last)
            .collect();
        ids.sort();
        for id in ids {
            if let Some(stream) = self.streams.remove(&id) {
                self.fail_queued(id, OperationError::GoAway(reason), eff);
                let kind = MessageKind::Disconnect(OperationError::GoAway(reason));
                self.notify(id, stream.listener, kind, eff);
            }
        }
        self.control(Control::go_away(frm), eff);
        self.check_close(eff);
    }

    fn window_update(
        &mut self,
        id: StreamId,
        inc: WindowSize,
        eff: &mut Effects,
    ) -> Result<(), ConnectionError> {
        log::trace!("processing WINDOW_UPDATE {:?}, inc={}", id, inc);

        if id.is_zero() {
            if inc == 0 {
                proto_err!(conn: "zero connection window update");
                return Err(ConnectionError::ZeroWindowUpdateValue);
            }
            self.send_window = self.send_window.inc(inc).map_err(|_| {
                proto_err!(conn: "connection window overflow");
                ConnectionError::WindowValueOverflow
            })?;
        } else if let Some(stream) = self.streams.get_mut(&id) {
            if inc == 0 {
                proto_err!(stream: "zero stream window update; stream={:?}", id);
                self.stream_error(id, StreamError::WindowZeroUpdateValue, eff);
            } else {
                match stream.send_window.inc(inc) {
                    Ok(w) => stream.send_window = w,
                    Err(_) => {
                        proto_err!(stream: "stream window overflow; stream={:?}", id);
                        self.stream_error(id, StreamError::WindowOverflowed, eff);
                    }
                }
            }
        } else if self.is_idle(id) {
            proto_err!(conn: "WINDOW_UPDATE for idle stream; id={:?}", id);
            return Err(ConnectionError::UnknownStream(id));
        }
        Ok(())
    }

    fn enqueue_frames(
        &mut self,
        id: StreamId,
        frames: Vec<Frame>,
        cb: Callback,
        eff: &mut Effects,
    ) {
        if self.state == SessionState::Closed {
            eff.callbacks.push((cb, Err(OperationError::Closed)));
            return;
        }
        let stream = match self.streams.get_mut(&id) {
            Some(stream) => stream,
            None => {
                eff.callbacks.push((cb, Err(OperationError::Closed)));
                return;
            }
        };
        if frames.is_empty() {
            eff.callbacks.push((cb, Ok(())));
            return;
        }

        let mut status = stream.status;
        for frm in &frames {
            let res = if frm.stream_id() != id {
                Err(OperationError::InvalidFrame)
            } else {
                match frm {
                    Frame::Headers(h) => status.send_headers(h.is_end_stream()),
                    Frame::Data(d) => status.send_data(d.is_end_stream()),
                    Frame::Priority(_) => Ok(()),
                    _ => Err(OperationError::InvalidFrame),
                }
            };
            if let Err(err) = res {
                log::debug!("cannot send {:?} on stream {:?}: {}", frm, id, err);
                eff.callbacks.push((cb, Err(err)));
                return;
            }
        }
        let alloc = stream.state() == StreamState::Idle;
        stream.status = status;

        let last = frames.len() - 1;
        let mut cb = Some(cb);
        for (idx, frame) in frames.into_iter().enumerate() {
            self.queue.push(Entry {
                frame,
                stream: id,
                alloc: alloc && idx == 0,
                callback: if idx == last { cb.take() } else { None },
            });
        }
    }

    fn next_local_id(&mut self) -> Result<StreamId, OperationError> {
        let id = self.next_local_id.ok_or(OperationError::OverflowedStreamId)?;
        self.next_local_id = id.next_id().ok();
        Ok(id)
    }

    fn check_new_stream(&self) -> Result<(), OperationError> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::GoingAwayLocal | SessionState::GoingAwayRemote => {
                Err(OperationError::GoAway(Reason::NO_ERROR))
            }
            SessionState::Closed => Err(OperationError::Closed),
        }
    }

    fn push(
        &mut self,
        parent: StreamId,
        mut frm: PushPromise,
        listener: Arc<dyn StreamListener>,
    ) -> Result<StreamRef, OperationError> {
        if self.role != Role::Server || frm.stream_id() != parent {
            return Err(OperationError::InvalidFrame);
        }
        if !self.remote_push_enabled {
            return Err(OperationError::PushDisabled);
        }
        self.check_new_stream()?;
        match self.streams.get(&parent).map(|s| s.state()) {
            Some(StreamState::Open | StreamState::HalfClosedRemote) => (),
            _ => return Err(OperationError::Closed),
        }
        if let Some(max) = self.remote_max_concurrent {
            let active = self.streams.values().filter(|s| !s.is_remote()).count();
            if active >= max as usize {
                return Err(OperationError::Concurrency);
            }
        }

        let id = self.next_local_id()?;
        log::trace!("reserve pushed stream {:?} for {:?}", id, parent);
        frm.set_promised_id(id);

        let mut status = StreamStatus::new(StreamState::ReservedLocal, false);
        status.flags.insert(StreamFlags::PENDING_PROMISE);
        let stream = StreamInner::new(
            id,
            status,
            self.remote_init_window,
            self.config.window_sz,
            listener,
        );
        self.streams.insert(id, stream);
        self.queue.push(Entry {
            stream: parent,
            frame: frm.into(),
            callback: None,
            alloc: true,
        });
        Ok(self.stream_ref(id))
    }

    fn send_request(
        &mut self,
        pseudo: PseudoHeaders,
        headers: HeaderMap,
        eof: bool,
        listener: Arc<dyn StreamListener>,
    ) -> Result<StreamRef, OperationError> {
        if self.role != Role::Client {
            return Err(OperationError::InvalidFrame);
        }
        self.check_new_stream()?;
        if let Some(max) = self.remote_max_concurrent {
            let active = self.streams.values().filter(|s| !s.is_remote()).count();
            if active >= max as usize {
                return Err(OperationError::Concurrency);
            }
        }

        let id = self.next_local_id()?;
        log::trace!("open stream {:?}", id);
        let mut stream = StreamInner::new(
            id,
            StreamStatus::new(StreamState::Idle, false),
            self.remote_init_window,
            self.config.window_sz,
            listener,
        );
        stream.status.send_headers(eof)?;
        self.streams.insert(id, stream);
        self.queue.push(Entry {
            stream: id,
            frame: frame::Headers::new(id, pseudo, headers, eof).into(),
            callback: None,
            alloc: true,
        });
        Ok(self.stream_ref(id))
    }

    /// Local reset
    fn reset_stream(&mut self, id: StreamId, reason: Reason, eff: &mut Effects) {
        if let Some(stream) = self.streams.remove(&id) {
            log::trace!("reset stream {:?} with {:?}", id, reason);
            self.fail_queued(id, OperationError::Reset(reason), eff);
            // peer does not know about the stream yet
            if !stream.status.flags.contains(StreamFlags::PENDING_PROMISE) {
                self.queue.push_control(Reset::new(id, reason).into());
                self.record_reset(id);
            }
            let kind = MessageKind::Disconnect(OperationError::Reset(reason));
            self.notify(id, stream.listener, kind, eff);
            self.check_close(eff);
        }
    }

    /// Stream level protocol error
    fn stream_error(&mut self, id: StreamId, err: StreamError, eff: &mut Effects) {
        log::debug!("stream {:?} error: {}", id, err);
        if let Some(stream) = self.streams.remove(&id) {
            self.fail_queued(id, OperationError::Stream(err), eff);
            self.notify(id, stream.listener, MessageKind::Eof(StreamEof::Error(err)), eff);
        }
        self.queue.push_control(Reset::new(id, err.reason()).into());
        self.record_reset(id);
        self.check_close(eff);
    }

    fn fail_queued(&mut self, id: StreamId, err: OperationError, eff: &mut Effects) {
        for cb in self.queue.remove_stream(id) {
            eff.callbacks.push((cb, Err(err.clone())));
        }
    }

    fn record_reset(&mut self, id: StreamId) {
        if self.config.reset_max == 0 {
            return;
        }
        let now = Instant::now();
        self.reset_streams.retain(|(_, expire)| *expire > now);
        self.reset_streams.push_back((id, now + self.config.reset_duration));
        while self.reset_streams.len() > self.config.reset_max {
            self.reset_streams.pop_front();
        }
    }

    fn is_reset(&self, id: StreamId) -> bool {
        let now = Instant::now();
        self.reset_streams
            .iter()
            .any(|(rid, expire)| *rid == id && *expire > now)
    }

    fn maybe_remove(&mut self, id: StreamId, eff: &mut Effects) {
        let done = self
            .streams
            .get(&id)
            .map(|s| s.is_closed() && !self.queue.contains(id))
            .unwrap_or(false);
        if done {
            log::trace!("stream {:?} is closed", id);
            self.streams.remove(&id);
            self.check_close(eff);
        }
    }

    /// Remove closed streams without queued frames
    fn sweep(&mut self) {
        let closed: Vec<_> = self
            .streams
            .values()
            .filter(|s| s.is_closed() && !self.queue.contains(s.id))
            .map(|s| s.id)
            .collect();
        for id in closed {
            log::trace!("stream {:?} is closed", id);
            self.streams.remove(&id);
        }
    }

    fn check_close(&mut self, eff: &mut Effects) {
        match self.state {
            SessionState::GoingAwayLocal | SessionState::GoingAwayRemote
                if self.streams.is_empty() =>
            {
                log::trace!("all streams are closed, close session");
                self.terminate(OperationError::Closed, eff);
            }
            _ => (),
        }
    }

    /// Move to closed state, fail all streams and pending callbacks
    fn terminate(&mut self, err: OperationError, eff: &mut Effects) {
        if self.state == SessionState::Closed {
            return;
        }
        log::trace!("session is terminated: {}", err);
        self.state = SessionState::Closed;

        let streams = mem::take(&mut self.streams);
        for (id, stream) in streams {
            self.notify(id, stream.listener, MessageKind::Disconnect(err.clone()), eff);
        }
        for cb in self.queue.clear() {
            eff.callbacks.push((cb, Err(err.clone())));
        }
        for (_, cb) in self.pings.drain(..) {
            eff.callbacks.push((cb, Err(err.clone())));
        }
        self.control(Control::terminated(), eff);
    }

    fn connection_error(&mut self, err: ConnectionError, eff: &mut Effects) {
        if self.state == SessionState::Closed {
            return;
        }
        log::debug!("connection error: {}", err);
        let last = self.last_remote_id;
        self.control(Control::proto_error(err.clone(), last), eff);
        self.terminate(OperationError::Connection(err), eff);
    }

    fn apply_ack(&mut self, ack: ControlAck, eff: &mut Effects) {
        self.pending_controls = self.pending_controls.saturating_sub(1);
        if let Some(frm) = ack.frame {
            match frm {
                Frame::Reset(rst) if !rst.stream_id().is_zero() => {
                    self.reset_stream(rst.stream_id(), rst.reason(), eff)
                }
                frm => self.queue.push_control(frm),
            }
        }
        if ack.disconnect {
            self.terminate(OperationError::Closed, eff);
        }
    }

    /// Usable send capacity of the stream
    fn send_capacity(&self, id: StreamId) -> usize {
        let stream = self
            .streams
            .get(&id)
            .map(|s| s.send_window.window_size())
            .unwrap_or(0);
        stream
            .min(self.send_window.window_size())
            .min(self.codec.send_frame_size() as WindowSize) as usize
    }

    fn consume_send_window(&mut self, id: StreamId, size: usize) {
        let size = size as WindowSize;
        if let Ok(w) = self.send_window.dec(size) {
            self.send_window = w;
        }
        if let Some(stream) = self.streams.get_mut(&id) {
            if let Ok(w) = stream.send_window.dec(size) {
                stream.send_window = w;
            }
        }
    }

    fn encode(&self, frame: Frame, buf: &mut BytesMut) {
        log::trace!("encoding {:?}", frame);
        if let Err(err) = self.codec.encode(frame, buf) {
            log::error!("cannot encode frame: {}", err);
        }
    }

    /// Encode writable frames into a single buffer
    fn prepare_flush(&mut self) -> (BytesMut, Vec<Callback>) {
        let mut buf = BytesMut::new();
        let mut done = Vec::new();

        if self.flags.contains(Flags::SEND_PREFACE) {
            self.flags.remove(Flags::SEND_PREFACE);
            buf.extend_from_slice(&consts::PREFACE);
        }
        while let Some(entry) = self.queue.pop_control() {
            self.encode(entry.frame, &mut buf);
            done.extend(entry.callback);
        }

        let mut blocked = HashSet::new();
        let mut alloc_blocked = false;
        let mut pending = VecDeque::new();

        for mut entry in self.queue.take() {
            let id = entry.stream;
            let promise_pending = self
                .streams
                .get(&id)
                .map(|s| s.status.flags.contains(StreamFlags::PENDING_PROMISE))
                .unwrap_or(false);
            if promise_pending || blocked.contains(&id) || (entry.alloc && alloc_blocked) {
                alloc_blocked |= entry.alloc;
                blocked.insert(id);
                pending.push_back(entry);
                continue;
            }

            match entry.frame {
                Frame::Data(mut data) => {
                    let len = data.flow_len() as usize;
                    let avail = self.send_capacity(id);
                    if len <= avail {
                        self.consume_send_window(id, len);
                        self.encode(data.into(), &mut buf);
                    } else {
                        if avail > 0 && !data.is_padded() {
                            let chunk = Data::new(id, data.payload_mut().split_to(avail));
                            self.consume_send_window(id, avail);
                            self.encode(chunk.into(), &mut buf);
                        }
                        log::trace!("stream {:?} is blocked by flow control", id);
                        entry.frame = data.into();
                        blocked.insert(id);
                        pending.push_back(entry);
                        continue;
                    }
                }
                Frame::PushPromise(frm) => {
                    if let Some(stream) = self.streams.get_mut(&frm.promised_id()) {
                        stream.status.flags.remove(StreamFlags::PENDING_PROMISE);
                    }
                    self.encode(frm.into(), &mut buf);
                }
                frm => self.encode(frm, &mut buf),
            }
            done.extend(entry.callback);
        }
        self.queue.restore(pending);

        (buf, done)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        f.debug_struct("Session")
            .field("role", &inner.role)
            .field("state", &inner.state)
            .field("streams", &inner.streams.len())
            .field("send_window", &inner.send_window.value())
            .field("recv_window", &inner.recv_window.value())
            .field("bytes_written", &inner.bytes_written)
            .finish()
    }
}
