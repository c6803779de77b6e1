//! Endpoint lifecycle shared by connections, sessions and links.
//!
//! Every AMQP endpoint is opened and closed independently by each side. The
//! combined state is derived from the local and remote halves:
//!
//! ```text
//!                 open()                       remote open
//!   Unopened ─────────────> LocallyOpened ───────────────┐
//!      │                                                 ↓
//!      │ remote open                                  Active
//!      └─────────────────> RemotelyOpened ───────────────┘
//!                                             open()     │
//!                         close()                        │ remote close
//!          LocallyClosing <──────────────────────────────┤
//!                │                                       ↓
//!                │ remote close                  RemotelyClosing
//!                ↓                                       │ close()
//!             Closed <───────────────────────────────────┘
//! ```
//!
//! `Closed` is terminal. Losing the connection forces it from any state.

use crate::error::CoreError;

/// Combined lifecycle state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// Neither side has opened
    Unopened,
    /// We opened, waiting for the peer
    LocallyOpened,
    /// Peer opened, waiting for us
    RemotelyOpened,
    /// Both sides opened
    Active,
    /// We closed, waiting for the peer
    LocallyClosing,
    /// Peer closed, waiting for us
    RemotelyClosing,
    /// Both sides closed
    Closed,
}

impl EndpointState {
    /// Whether the endpoint reached `Closed`.
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }

    /// Whether either side has started closing.
    pub fn is_closing(self) -> bool {
        matches!(self, Self::LocallyClosing | Self::RemotelyClosing | Self::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
    Unopened,
    Open,
    Closed,
}

/// Local and remote halves of an endpoint's lifecycle.
#[derive(Debug, Clone)]
pub struct Endpoint {
    local: Half,
    remote: Half,
}

impl Endpoint {
    /// A fresh, unopened endpoint.
    pub fn new() -> Self {
        Self { local: Half::Unopened, remote: Half::Unopened }
    }

    /// Combined state.
    pub fn state(&self) -> EndpointState {
        match (self.local, self.remote) {
            (Half::Unopened, Half::Unopened) => EndpointState::Unopened,
            (Half::Open, Half::Unopened) => EndpointState::LocallyOpened,
            (Half::Unopened, Half::Open) => EndpointState::RemotelyOpened,
            (Half::Open, Half::Open) => EndpointState::Active,
            (Half::Closed, Half::Closed) => EndpointState::Closed,
            (Half::Closed, _) => EndpointState::LocallyClosing,
            (_, Half::Closed) => EndpointState::RemotelyClosing,
        }
    }

    /// Whether we have announced the endpoint to the peer.
    pub fn locally_opened(&self) -> bool {
        self.local == Half::Open
    }

    /// Whether the peer has announced the endpoint and not closed it.
    pub fn remotely_opened(&self) -> bool {
        self.remote == Half::Open
    }

    /// Whether we ever announced the endpoint, including if since closed.
    pub fn ever_locally_opened(&self) -> bool {
        self.local != Half::Unopened
    }

    /// Record our open.
    ///
    /// # Errors
    ///
    /// `IllegalState` unless the local half is unopened.
    pub fn open_local(&mut self, operation: &'static str) -> Result<EndpointState, CoreError> {
        if self.local != Half::Unopened {
            return Err(CoreError::IllegalState { state: self.state(), operation });
        }
        self.local = Half::Open;
        Ok(self.state())
    }

    /// Record the peer's open.
    ///
    /// # Errors
    ///
    /// `IllegalState` unless the remote half is unopened.
    pub fn open_remote(&mut self) -> Result<EndpointState, CoreError> {
        if self.remote != Half::Unopened {
            return Err(CoreError::IllegalState { state: self.state(), operation: "remote open" });
        }
        self.remote = Half::Open;
        Ok(self.state())
    }

    /// Record our close.
    ///
    /// An endpoint the peer never saw has nothing to wait for, so closing it
    /// goes straight to `Closed`.
    ///
    /// # Errors
    ///
    /// `IllegalState` if we already closed.
    pub fn close_local(&mut self, operation: &'static str) -> Result<EndpointState, CoreError> {
        if self.local == Half::Closed {
            return Err(CoreError::IllegalState { state: self.state(), operation });
        }
        if self.local == Half::Unopened && self.remote == Half::Unopened {
            self.remote = Half::Closed;
        }
        self.local = Half::Closed;
        Ok(self.state())
    }

    /// Record the peer's close. Repeated closes are ignored.
    pub fn close_remote(&mut self) -> EndpointState {
        self.remote = Half::Closed;
        self.state()
    }

    /// Force both halves closed (connection teardown).
    pub fn force_closed(&mut self) {
        self.local = Half::Closed;
        self.remote = Half::Closed;
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_then_remote_open_is_active() {
        let mut endpoint = Endpoint::new();
        assert_eq!(endpoint.open_local("open").unwrap(), EndpointState::LocallyOpened);
        assert_eq!(endpoint.open_remote().unwrap(), EndpointState::Active);
    }

    #[test]
    fn remote_then_local_open_is_active() {
        let mut endpoint = Endpoint::new();
        assert_eq!(endpoint.open_remote().unwrap(), EndpointState::RemotelyOpened);
        assert_eq!(endpoint.open_local("open").unwrap(), EndpointState::Active);
    }

    #[test]
    fn local_close_waits_for_peer() {
        let mut endpoint = Endpoint::new();
        endpoint.open_local("open").unwrap();
        endpoint.open_remote().unwrap();

        assert_eq!(endpoint.close_local("close").unwrap(), EndpointState::LocallyClosing);
        assert_eq!(endpoint.close_remote(), EndpointState::Closed);
    }

    #[test]
    fn remote_close_waits_for_local() {
        let mut endpoint = Endpoint::new();
        endpoint.open_local("open").unwrap();
        endpoint.open_remote().unwrap();

        assert_eq!(endpoint.close_remote(), EndpointState::RemotelyClosing);
        assert_eq!(endpoint.close_local("close").unwrap(), EndpointState::Closed);
    }

    #[test]
    fn closing_an_unannounced_endpoint_is_immediate() {
        let mut endpoint = Endpoint::new();
        assert_eq!(endpoint.close_local("close").unwrap(), EndpointState::Closed);
        assert!(!endpoint.ever_locally_opened());
    }

    #[test]
    fn invalid_transitions() {
        let mut endpoint = Endpoint::new();
        endpoint.open_local("open").unwrap();
        assert!(matches!(
            endpoint.open_local("open"),
            Err(CoreError::IllegalState { state: EndpointState::LocallyOpened, .. })
        ));

        endpoint.open_remote().unwrap();
        assert!(endpoint.open_remote().is_err());

        endpoint.close_local("close").unwrap();
        assert!(endpoint.close_local("close").is_err());
        assert!(endpoint.open_local("open").is_err());
    }
}
