use tracing::debug;

use crate::error::{Error, Result};

/// Lifecycle of one session.
///
/// ```text
///  Init --SynAccepted--> Established --DataStarted--> Transferring
///                            |                              |
///                            +--------DataFinished----------+--> Closing --FinExchanged--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Init,
    Established,
    Transferring,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SynAccepted,
    DataStarted,
    DataFinished,
    FinExchanged,
}

impl SessionState {
    pub fn next(self, event: SessionEvent) -> Result<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self, event) {
            (Init, SynAccepted) => Established,
            (Established, DataStarted) => Transferring,
            // a transfer without data goes straight to closing
            (Established | Transferring, DataFinished) => Closing,
            (Closing, FinExchanged) => Closed,
            (from, event) => return Err(Error::InvalidTransition { from, event }),
        };
        debug!(from = ?self, to = ?next, ?event, "session transition");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionEvent::*;
    use super::SessionState::*;
    use super::*;

    #[test]
    fn full_lifecycle() {
        let state = Init
            .next(SynAccepted)
            .and_then(|s| s.next(DataStarted))
            .and_then(|s| s.next(DataFinished))
            .and_then(|s| s.next(FinExchanged))
            .unwrap();
        assert_eq!(state, Closed);
    }

    #[test]
    fn empty_transfer_skips_transferring() {
        assert_eq!(Established.next(DataFinished).unwrap(), Closing);
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let err = Init.next(DataStarted).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition { from: Init, event: DataStarted }
        ));
        assert!(Closed.next(SynAccepted).is_err());
        assert!(Transferring.next(FinExchanged).is_err());
    }
}
