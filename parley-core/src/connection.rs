//! Duplex connection lifecycle for Parley.
//!
//! This module provides a pure, side-effect-free state machine for a
//! persistent duplex session. It takes events as input and produces a new
//! state plus a list of actions to execute.
//!
//! The machine guarantees that a live connection reports its disconnected
//! transition exactly once, whether the socket fails, the peer closes it, or
//! the caller asks to disconnect, and however many of those happen.

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller asked to disconnect.
    Requested,
    /// The connection failed or the peer closed it.
    Failed(String),
}

impl CloseReason {
    /// Whether the closure was asked for.
    pub fn is_intentional(&self) -> bool {
        matches!(self, CloseReason::Requested)
    }
}

/// Connection lifecycle - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No socket.
    #[default]
    Disconnected,
    /// Socket opening.
    Connecting,
    /// Socket open and the receive loop running.
    Connected,
}

impl LinkState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: LinkEvent) -> (Self, Vec<LinkAction>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, LinkEvent::ConnectRequested) => {
                (Self::Connecting, vec![LinkAction::OpenSocket])
            }

            // From Connecting
            (Self::Connecting, LinkEvent::Opened) => (
                Self::Connected,
                vec![
                    LinkAction::SendSessionUpdate,
                    LinkAction::StartReceiveLoop,
                    LinkAction::ReportStatus(true),
                ],
            ),
            (Self::Connecting, LinkEvent::OpenFailed { error }) => (
                Self::Disconnected,
                vec![LinkAction::RecordClose(CloseReason::Failed(error))],
            ),
            (Self::Connecting, LinkEvent::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    LinkAction::CloseSocket,
                    LinkAction::RecordClose(CloseReason::Requested),
                ],
            ),

            // From Connected
            (Self::Connected, LinkEvent::ReadFailed { error }) => (
                Self::Disconnected,
                vec![
                    LinkAction::RecordClose(CloseReason::Failed(error)),
                    LinkAction::ReportStatus(false),
                ],
            ),
            (Self::Connected, LinkEvent::RemoteClosed { reason }) => (
                Self::Disconnected,
                vec![
                    LinkAction::RecordClose(CloseReason::Failed(reason)),
                    LinkAction::ReportStatus(false),
                ],
            ),
            (Self::Connected, LinkEvent::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    LinkAction::StopReceiveLoop,
                    LinkAction::CloseSocket,
                    LinkAction::RecordClose(CloseReason::Requested),
                    LinkAction::ReportStatus(false),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Caller asked to connect.
    ConnectRequested,
    /// The socket opened.
    Opened,
    /// The socket could not be opened.
    OpenFailed {
        /// What went wrong.
        error: String,
    },
    /// Reading from the socket failed.
    ReadFailed {
        /// What went wrong.
        error: String,
    },
    /// The peer closed the socket.
    RemoteClosed {
        /// Close frame reason, if any.
        reason: String,
    },
    /// Caller asked to disconnect.
    DisconnectRequested,
}

/// Actions to be executed by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Open the socket.
    OpenSocket,
    /// Push session settings as the first frame.
    SendSessionUpdate,
    /// Spawn the receive loop.
    StartReceiveLoop,
    /// Abort the receive loop.
    StopReceiveLoop,
    /// Close the socket.
    CloseSocket,
    /// Remember why the session stopped.
    RecordClose(CloseReason),
    /// Publish a connected/disconnected transition.
    ReportStatus(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> LinkState {
        let (s, _) = LinkState::new().on_event(LinkEvent::ConnectRequested);
        let (s, _) = s.on_event(LinkEvent::Opened);
        s
    }

    fn status_reports(actions: &[LinkAction]) -> Vec<bool> {
        actions
            .iter()
            .filter_map(|a| match a {
                LinkAction::ReportStatus(up) => Some(*up),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn starts_disconnected() {
        assert_eq!(LinkState::new(), LinkState::Disconnected);
        assert!(!LinkState::default().is_connected());
    }

    #[test]
    fn open_sends_session_update_first() {
        let (s, actions) = LinkState::new().on_event(LinkEvent::ConnectRequested);
        assert_eq!(actions, vec![LinkAction::OpenSocket]);

        let (s, actions) = s.on_event(LinkEvent::Opened);
        assert!(s.is_connected());
        assert_eq!(actions[0], LinkAction::SendSessionUpdate);
        assert_eq!(status_reports(&actions), vec![true]);
    }

    #[test]
    fn failed_open_never_reports_status() {
        let (s, _) = LinkState::new().on_event(LinkEvent::ConnectRequested);
        let (s, actions) = s.on_event(LinkEvent::OpenFailed {
            error: "refused".into(),
        });
        assert_eq!(s, LinkState::Disconnected);
        assert!(status_reports(&actions).is_empty());
        assert_eq!(
            actions,
            vec![LinkAction::RecordClose(CloseReason::Failed("refused".into()))]
        );
    }

    #[test]
    fn read_failure_reports_disconnect_once() {
        let (s, first) = connected().on_event(LinkEvent::ReadFailed {
            error: "reset".into(),
        });
        let (s, second) = s.on_event(LinkEvent::ReadFailed {
            error: "reset again".into(),
        });
        let (s, third) = s.on_event(LinkEvent::RemoteClosed {
            reason: "bye".into(),
        });
        let (_, fourth) = s.on_event(LinkEvent::DisconnectRequested);

        assert_eq!(status_reports(&first), vec![false]);
        assert!(second.is_empty());
        assert!(third.is_empty());
        assert!(fourth.is_empty());
    }

    #[test]
    fn requested_disconnect_is_intentional() {
        let (s, actions) = connected().on_event(LinkEvent::DisconnectRequested);
        assert_eq!(s, LinkState::Disconnected);
        assert!(actions.contains(&LinkAction::StopReceiveLoop));
        assert!(actions.contains(&LinkAction::CloseSocket));
        assert!(actions.contains(&LinkAction::RecordClose(CloseReason::Requested)));
        assert_eq!(status_reports(&actions), vec![false]);

        let (_, again) = s.on_event(LinkEvent::DisconnectRequested);
        assert!(again.is_empty());
    }

    #[test]
    fn remote_close_is_a_failure() {
        let (_, actions) = connected().on_event(LinkEvent::RemoteClosed {
            reason: "going away".into(),
        });
        let reason = actions
            .iter()
            .find_map(|a| match a {
                LinkAction::RecordClose(r) => Some(r.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!reason.is_intentional());
    }

    #[test]
    fn reconnect_after_failure() {
        let (s, _) = connected().on_event(LinkEvent::ReadFailed {
            error: "eof".into(),
        });
        let (s, actions) = s.on_event(LinkEvent::ConnectRequested);
        assert_eq!(s, LinkState::Connecting);
        assert_eq!(actions, vec![LinkAction::OpenSocket]);
    }
}
