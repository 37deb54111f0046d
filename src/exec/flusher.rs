use std::{fmt, io, io::Write};

use ntex_bytes::Bytes;
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};

use super::{Exec, FlushDone, Flusher};

enum Message {
    Write(Bytes, FlushDone),
    Shutdown,
}

/// Flusher over any `io::Write`
///
/// Buffers are drained in call order by a writer task on the blocking pool
/// of the runtime. After the first write error every following flush fails
/// with the same error kind.
pub struct IoFlusher {
    tx: UnboundedSender<Message>,
}

impl IoFlusher {
    pub fn new<W>(exec: &Exec, io: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        exec.handle().spawn_blocking(move || writer(io, rx));
        IoFlusher { tx }
    }
}

fn writer<W: Write>(mut io: W, mut rx: UnboundedReceiver<Message>) {
    let mut failed: Option<io::ErrorKind> = None;

    while let Some(msg) = rx.blocking_recv() {
        match msg {
            Message::Write(buf, done) => {
                if let Some(kind) = failed {
                    done(Err(io::Error::new(kind, "previous write failed")));
                    continue;
                }
                let res = io.write_all(&buf).and_then(|_| io.flush());
                if let Err(ref e) = res {
                    log::debug!("write failed: {}", e);
                    failed = Some(e.kind());
                } else {
                    log::trace!("flushed {}B", buf.len());
                }
                done(res)
            }
            Message::Shutdown => break,
        }
    }
    rx.close();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Write(_, done) = msg {
            done(Err(closed()))
        }
    }
    let _ = io.flush();
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "flusher is shut down")
}

impl Flusher for IoFlusher {
    fn flush(&self, buf: Bytes, done: FlushDone) {
        if let Err(SendError(Message::Write(_, done))) = self.tx.send(Message::Write(buf, done)) {
            done(Err(closed()))
        }
    }

    fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

impl fmt::Debug for IoFlusher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoFlusher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
