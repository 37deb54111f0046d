use std::collections::VecDeque;

use crate::{callback::Callback, frame::Frame, frame::StreamId};

/// Queued outbound frame
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) stream: StreamId,
    pub(crate) frame: Frame,
    /// Completes after the frame is flushed
    pub(crate) callback: Option<Callback>,
    /// Frame allocates a new local stream id (HEADERS of a new stream or
    /// PUSH_PROMISE), such frames are written in id order.
    pub(crate) alloc: bool,
}

/// Outbound frame queue
///
/// Control frames are written ahead of stream frames, stream frames keep
/// per-stream FIFO order.
#[derive(Debug, Default)]
pub(crate) struct Queue {
    control: VecDeque<Entry>,
    normal: VecDeque<Entry>,
}

impl Queue {
    pub(crate) fn push_control(&mut self, frame: Frame) {
        debug_assert!(frame.is_control(), "not a control frame: {:?}", frame);
        log::trace!("queue control frame {:?}", frame);
        self.control.push_back(Entry {
            stream: frame.stream_id(),
            callback: None,
            alloc: false,
            frame,
        });
    }

    pub(crate) fn push(&mut self, entry: Entry) {
        log::trace!("queue frame {:?}", entry.frame);
        self.normal.push_back(entry);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.control.is_empty() && self.normal.is_empty()
    }

    pub(crate) fn has_control(&self) -> bool {
        !self.control.is_empty()
    }

    /// Check if any stream frame for `id` is queued
    pub(crate) fn contains(&self, id: StreamId) -> bool {
        self.normal.iter().any(|e| e.stream == id)
    }

    pub(crate) fn pop_control(&mut self) -> Option<Entry> {
        self.control.pop_front()
    }

    pub(crate) fn take(&mut self) -> VecDeque<Entry> {
        std::mem::take(&mut self.normal)
    }

    pub(crate) fn restore(&mut self, entries: VecDeque<Entry>) {
        debug_assert!(self.normal.is_empty());
        self.normal = entries;
    }

    /// Remove stream frames of `id` together with PUSH_PROMISE frames that
    /// promise `id`, returns their callbacks.
    pub(crate) fn remove_stream(&mut self, id: StreamId) -> Vec<Callback> {
        let mut callbacks = Vec::new();
        self.normal.retain_mut(|entry| {
            let remove = entry.stream == id
                || matches!(entry.frame, Frame::PushPromise(ref p) if p.promised_id() == id);
            if remove {
                callbacks.extend(entry.callback.take());
            }
            !remove
        });
        callbacks
    }

    /// Remove all stream frames, returns their callbacks.
    pub(crate) fn clear(&mut self) -> Vec<Callback> {
        self.normal
            .drain(..)
            .filter_map(|entry| entry.callback)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use ntex_bytes::Bytes;

    use super::*;
    use crate::frame::{Data, Ping};

    fn data(id: u32) -> Entry {
        Entry {
            stream: id.into(),
            frame: Data::new(id.into(), Bytes::new()).into(),
            callback: Some(Callback::noop()),
            alloc: false,
        }
    }

    #[test]
    fn test_remove_stream() {
        let mut q = Queue::default();
        q.push(data(1));
        q.push(data(3));
        q.push(data(1));
        q.push_control(Ping::new([0; 8]).into());
        assert!(q.contains(1.into()));
        assert_eq!(q.remove_stream(1.into()).len(), 2);
        assert!(!q.contains(1.into()));
        assert!(q.contains(3.into()));
        assert!(q.has_control());

        assert_eq!(q.clear().len(), 1);
        assert!(q.pop_control().is_some());
        assert!(q.is_empty());
    }
}
