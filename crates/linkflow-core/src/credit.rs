//! Credit ledgers.
//!
//! Credit is the number of deliveries a receiver is prepared to accept.
//! Both ends of a link keep a ledger, with different jobs:
//!
//! - [`ReceiverCredit`] records what the application granted and counts
//!   transfers against it. A transfer that arrives with no credit left is a
//!   peer violation.
//! - [`SenderCredit`] records the peer's most recent grant and how many
//!   deliveries were transmitted since, and answers "may I send now".
//!
//! # Accounting
//!
//! A flow carries the receiver's `delivery_count` (deliveries it has seen)
//! and `link_credit` (further deliveries it will accept). The sender keeps
//! its own `delivery_count`; the difference is what is still in flight past
//! the peer's horizon:
//!
//! ```text
//! in_flight = local.delivery_count - peer.delivery_count   (serial u32)
//! available = peer.link_credit - in_flight                 (never below 0)
//! ```
//!
//! The sender is *exhausted* (its send queue is full) exactly when
//! `available` is zero. Transitions in and out of that state are reported
//! so the link can notify the application once per edge.

use linkflow_proto::LinkId;

use crate::error::CoreError;

/// Edge reported by a sender ledger update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditTransition {
    /// Exhaustion unchanged
    Unchanged,
    /// Credit reached zero
    Exhausted,
    /// Credit became available after being exhausted
    Replenished,
}

/// Flow state a receiver advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowState {
    /// Deliveries received so far
    pub delivery_count: u32,
    /// Further deliveries accepted
    pub link_credit: u32,
}

/// Sender side of the credit ledger.
#[derive(Debug, Clone)]
pub struct SenderCredit {
    link: LinkId,
    delivery_count: u32,
    peer_delivery_count: u32,
    peer_link_credit: u32,
    exhausted: bool,
    cancelled: bool,
}

impl SenderCredit {
    /// Ledger for a new sender. A sender starts without credit.
    pub fn new(link: LinkId) -> Self {
        Self {
            link,
            delivery_count: 0,
            peer_delivery_count: 0,
            peer_link_credit: 0,
            exhausted: true,
            cancelled: false,
        }
    }

    /// Deliveries transmitted that the peer's last flow did not yet count.
    pub fn in_flight(&self) -> u32 {
        let diff = self.delivery_count.wrapping_sub(self.peer_delivery_count);
        // Peer claims to have seen more than we sent; nothing is in flight.
        if (diff as i32) < 0 { 0 } else { diff }
    }

    /// Deliveries that may be transmitted right now.
    pub fn available(&self) -> u32 {
        self.peer_link_credit.saturating_sub(self.in_flight())
    }

    /// Deliveries transmitted so far.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Whether new sends would be buffered.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Whether the owning link was closed.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Take credit for `count` deliveries about to be transmitted.
    ///
    /// # Errors
    ///
    /// - `LinkClosed` after [`Self::cancel`]
    /// - `InsufficientCredit` if `count` exceeds [`Self::available`]; the
    ///   ledger is unchanged
    pub fn consume(&mut self, count: u32) -> Result<CreditTransition, CoreError> {
        if self.cancelled {
            return Err(CoreError::LinkClosed(self.link));
        }

        let available = self.available();
        if count > available {
            return Err(CoreError::InsufficientCredit { requested: count, available });
        }

        self.delivery_count = self.delivery_count.wrapping_add(count);

        if self.available() == 0 && !self.exhausted {
            self.exhausted = true;
            return Ok(CreditTransition::Exhausted);
        }
        Ok(CreditTransition::Unchanged)
    }

    /// Apply a flow from the peer.
    ///
    /// # Errors
    ///
    /// `LinkClosed` after [`Self::cancel`].
    pub fn replenish(
        &mut self,
        delivery_count: u32,
        link_credit: u32,
    ) -> Result<CreditTransition, CoreError> {
        if self.cancelled {
            return Err(CoreError::LinkClosed(self.link));
        }

        self.peer_delivery_count = delivery_count;
        self.peer_link_credit = link_credit;

        let available = self.available();
        if self.exhausted && available > 0 {
            self.exhausted = false;
            Ok(CreditTransition::Replenished)
        } else if !self.exhausted && available == 0 {
            self.exhausted = true;
            Ok(CreditTransition::Exhausted)
        } else {
            Ok(CreditTransition::Unchanged)
        }
    }

    /// Discard the ledger; every later call fails with `LinkClosed`.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.peer_link_credit = 0;
    }
}

/// Receiver side of the credit ledger.
#[derive(Debug, Clone)]
pub struct ReceiverCredit {
    link: LinkId,
    credit: u32,
    delivery_count: u32,
    cancelled: bool,
}

impl ReceiverCredit {
    /// Ledger for a new receiver with nothing granted.
    pub fn new(link: LinkId) -> Self {
        Self { link, credit: 0, delivery_count: 0, cancelled: false }
    }

    /// Granted but not yet consumed.
    pub fn credit(&self) -> u32 {
        self.credit
    }

    /// Flow state to advertise.
    pub fn flow_state(&self) -> FlowState {
        FlowState { delivery_count: self.delivery_count, link_credit: self.credit }
    }

    /// Grant `additional` more deliveries.
    ///
    /// A grant of zero changes nothing but still yields the flow state, so
    /// the caller can tell the peer "no more for now".
    ///
    /// # Errors
    ///
    /// `LinkClosed` after [`Self::cancel`].
    pub fn grant(&mut self, additional: u32) -> Result<FlowState, CoreError> {
        if self.cancelled {
            return Err(CoreError::LinkClosed(self.link));
        }
        self.credit = self.credit.saturating_add(additional);
        Ok(self.flow_state())
    }

    /// Count one inbound transfer against the grant.
    ///
    /// # Errors
    ///
    /// - `LinkClosed` after [`Self::cancel`]
    /// - `InsufficientCredit` if nothing is left; the ledger is unchanged
    pub fn on_transfer(&mut self) -> Result<(), CoreError> {
        if self.cancelled {
            return Err(CoreError::LinkClosed(self.link));
        }
        if self.credit == 0 {
            return Err(CoreError::InsufficientCredit { requested: 1, available: 0 });
        }
        self.credit -= 1;
        self.delivery_count = self.delivery_count.wrapping_add(1);
        Ok(())
    }

    /// Discard the ledger; every later call fails with `LinkClosed`.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.credit = 0;
    }
}
