//! Response channel back to the requesting connection

use crate::protocol::{ProtocolError, Response};
use tokio::sync::mpsc;

/// Where a processor writes its response
///
/// Implementations wrap a connection; responses may be sent from any thread.
pub trait ResponseChannel: Send + Sync {
    /// Whether the peer can still receive responses
    fn is_open(&self) -> bool;

    /// Write one response
    ///
    /// # Errors
    /// `ChannelClosed` if the peer has gone away.
    fn send(&self, response: Response) -> Result<(), ProtocolError>;
}

/// Channel backed by an unbounded Tokio mpsc queue
#[derive(Debug, Clone)]
pub struct MpscResponseChannel {
    tx: mpsc::UnboundedSender<Response>,
}

impl MpscResponseChannel {
    /// Create a channel and the receiver its responses arrive on
    #[must_use]
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResponseChannel for MpscResponseChannel {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, response: Response) -> Result<(), ProtocolError> {
        self.tx.send(response).map_err(|_| ProtocolError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CURRENT_PROTOCOL_VERSION;
    use ledgerio_common::StatusCode;

    #[test]
    fn test_closed_channel() {
        let (channel, rx) = MpscResponseChannel::pair();
        assert!(channel.is_open());
        drop(rx);
        assert!(!channel.is_open());

        let response = Response::add(CURRENT_PROTOCOL_VERSION, StatusCode::Ok, 1, 0);
        assert!(matches!(channel.send(response), Err(ProtocolError::ChannelClosed)));
    }
}
