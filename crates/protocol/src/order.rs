use crate::ServerFrame;

/// Tracks the outbound frame sequence of one connection and refuses any
/// frame that would break `start → chunk* → (end | error)` or interleave
/// two streams.
#[derive(Debug, Default)]
pub struct FrameOrder {
    open: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderViolation {
    #[error("stream_start for {new} while {open} is still open")]
    Interleaved { open: String, new: String },

    #[error("frame for {0} which is not the open stream")]
    NotOpen(String),
}

impl FrameOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message id of the stream currently between start and terminal.
    pub fn open_stream(&self) -> Option<&str> {
        self.open.as_deref()
    }

    /// Record `frame` as sent. On error the state is left unchanged.
    pub fn observe(&mut self, frame: &ServerFrame) -> Result<(), OrderViolation> {
        let Some(id) = frame.message_id() else {
            return Ok(());
        };
        match (&self.open, frame) {
            (None, ServerFrame::StreamStart { .. }) => {
                self.open = Some(id.to_owned());
                Ok(())
            }
            (Some(open), ServerFrame::StreamStart { .. }) => Err(OrderViolation::Interleaved {
                open: open.clone(),
                new: id.to_owned(),
            }),
            (Some(open), f) if open == id => {
                if f.is_terminal() {
                    self.open = None;
                }
                Ok(())
            }
            _ => Err(OrderViolation::NotOpen(id.to_owned())),
        }
    }
}
