use crate::control::{Control, ControlAck, ControlService};
use crate::frame::Reason;
use crate::message::{ListenerError, Message, MessageKind, StreamListener};

/// Default control service
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultControlService;

impl ControlService for DefaultControlService {
    #[inline]
    fn on_control(&self, msg: Control) -> ControlAck {
        log::trace!("Default control service is used: {:?}", msg);
        msg.ack()
    }
}

/// Stream listener that refuses every stream
///
/// Used for sessions that do not expect peer initiated streams.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultStreamListener;

impl StreamListener for DefaultStreamListener {
    fn on_message(&self, mut msg: Message) -> Result<(), ListenerError> {
        match msg.kind().take() {
            MessageKind::Headers { .. } => {
                log::trace!("No stream listener, refuse stream {:?}", msg.stream().id());
                Err("stream is not expected".into())
            }
            MessageKind::Push { stream, .. } => {
                stream.reset(Reason::CANCEL);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
