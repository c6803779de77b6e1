//! Link state machine.
//!
//! A link composes a credit ledger and a delivery registry and drives both
//! from local calls and peer events. Senders and receivers share lifecycle,
//! naming and addressing; their credit state lives in [`LinkKind`].
//!
//! # Sending
//!
//! `send` never blocks and never fails for lack of credit. The delivery is
//! registered at once and queued; queued transfers go out in FIFO order
//! whenever the ledger allows. When the peer's flow lifts the sender out of
//! exhaustion and credit is still left after draining the queue, the link
//! reports [`ConnectionEvent::SendQueueDrained`].
//!
//! # Receiving
//!
//! Every inbound transfer is counted against the granted credit first. A
//! transfer beyond the grant detaches the link with
//! `amqp:link:transfer-limit-exceeded`. Credit is only ever raised by the
//! application calling `flow`.

use std::collections::VecDeque;

use bytes::Bytes;
use linkflow_proto::{
    DeliveryId, DeliveryTag, ErrorCondition, LinkId, Message, Outcome, Performative,
    RemoteLinkRef, Role, SessionId, Source, Target,
};
use tracing::{debug, trace, warn};

use crate::{
    config::ReceiveMode,
    credit::{CreditTransition, ReceiverCredit, SenderCredit},
    delivery::{DeliveryRegistry, Direction, DispositionChange},
    endpoint::{Endpoint, EndpointState},
    error::CoreError,
    event::{
        Abort, ConnectionAction, ConnectionEvent, DeliveryHandle, DeliveryUpdate, SettleToken,
    },
};

type Actions = Vec<ConnectionAction>;

#[derive(Debug)]
struct PendingTransfer {
    delivery: DeliveryId,
    tag: DeliveryTag,
    payload: Bytes,
}

/// Sender-specific state.
#[derive(Debug)]
pub struct SenderState {
    credit: SenderCredit,
    pending: VecDeque<PendingTransfer>,
    next_tag: u64,
    /// Credit was replenished before the attach; the drain event is due
    /// once the queue empties at open.
    drain_owed: bool,
}

impl SenderState {
    fn new(link: LinkId) -> Self {
        Self {
            credit: SenderCredit::new(link),
            pending: VecDeque::new(),
            next_tag: 0,
            drain_owed: false,
        }
    }

    /// Next generated tag not held by an unsettled delivery.
    fn generate_tag(&mut self, deliveries: &DeliveryRegistry) -> DeliveryTag {
        loop {
            let tag = DeliveryTag::from_counter(self.next_tag);
            self.next_tag = self.next_tag.wrapping_add(1);
            if !deliveries.contains_tag(&tag) {
                return tag;
            }
        }
    }

    /// Queued transfers waiting for credit.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Receiver-specific state.
#[derive(Debug)]
pub struct ReceiverState {
    credit: ReceiverCredit,
    mode: ReceiveMode,
}

/// Direction of a link with its credit state.
#[derive(Debug)]
pub enum LinkKind {
    /// We transmit
    Sender(SenderState),
    /// We accept
    Receiver(ReceiverState),
}

/// One link.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    session: SessionId,
    name: String,
    endpoint: Endpoint,
    source: Option<Source>,
    target: Option<Target>,
    remote_source: Option<Source>,
    remote_target: Option<Target>,
    remote: Option<RemoteLinkRef>,
    auto_settle: bool,
    deliveries: DeliveryRegistry,
    kind: LinkKind,
}

impl Link {
    /// New, unopened sending link.
    pub(crate) fn sender(id: LinkId, session: SessionId, name: String, auto_settle: bool) -> Self {
        Self::new(id, session, name, auto_settle, LinkKind::Sender(SenderState::new(id)))
    }

    /// New, unopened receiving link.
    pub(crate) fn receiver(
        id: LinkId,
        session: SessionId,
        name: String,
        auto_settle: bool,
    ) -> Self {
        let state = ReceiverState { credit: ReceiverCredit::new(id), mode: ReceiveMode::default() };
        Self::new(id, session, name, auto_settle, LinkKind::Receiver(state))
    }

    fn new(
        id: LinkId,
        session: SessionId,
        name: String,
        auto_settle: bool,
        kind: LinkKind,
    ) -> Self {
        Self {
            id,
            session,
            name,
            endpoint: Endpoint::new(),
            source: None,
            target: None,
            remote_source: None,
            remote_target: None,
            remote: None,
            auto_settle,
            deliveries: DeliveryRegistry::new(),
            kind,
        }
    }

    /// Local handle.
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Owning session.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Link name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role we play.
    pub fn role(&self) -> Role {
        match self.kind {
            LinkKind::Sender(_) => Role::Sender,
            LinkKind::Receiver(_) => Role::Receiver,
        }
    }

    /// Direction-specific state.
    pub fn kind(&self) -> &LinkKind {
        &self.kind
    }

    /// Lifecycle state.
    pub fn state(&self) -> EndpointState {
        self.endpoint.state()
    }

    /// Local source terms.
    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    /// Local target terms.
    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    /// Source terms the peer announced.
    pub fn remote_source(&self) -> Option<&Source> {
        self.remote_source.as_ref()
    }

    /// Target terms the peer announced.
    pub fn remote_target(&self) -> Option<&Target> {
        self.remote_target.as_ref()
    }

    /// Peer's numbering for this link, once it attached.
    pub fn remote(&self) -> Option<RemoteLinkRef> {
        self.remote
    }

    /// Whether remotely settled deliveries are settled locally at once.
    pub fn auto_settle(&self) -> bool {
        self.auto_settle
    }

    /// Unsettled deliveries.
    pub fn unsettled(&self) -> usize {
        self.deliveries.len()
    }

    /// Sender: deliveries that may go out now. Receiver: granted credit not
    /// yet consumed.
    pub fn credit(&self) -> u32 {
        match &self.kind {
            LinkKind::Sender(sender) => sender.credit.available(),
            LinkKind::Receiver(receiver) => receiver.credit.credit(),
        }
    }

    /// Whether a send now would be queued instead of transmitted.
    pub fn send_queue_full(&self) -> bool {
        match &self.kind {
            LinkKind::Sender(sender) => sender.credit.is_exhausted() || !sender.pending.is_empty(),
            LinkKind::Receiver(_) => false,
        }
    }

    /// Receive mode; `None` for senders.
    pub fn receive_mode(&self) -> Option<ReceiveMode> {
        match &self.kind {
            LinkKind::Sender(_) => None,
            LinkKind::Receiver(receiver) => Some(receiver.mode),
        }
    }

    fn handle(&self, delivery: DeliveryId) -> DeliveryHandle {
        DeliveryHandle { link: self.id, delivery }
    }

    fn ensure_not_attached(&self, operation: &'static str) -> Result<(), CoreError> {
        if self.endpoint.ever_locally_opened() || self.endpoint.state().is_closing() {
            return Err(CoreError::IllegalState { state: self.endpoint.state(), operation });
        }
        Ok(())
    }

    fn ensure_usable(&self, operation: &'static str) -> Result<(), CoreError> {
        let state = self.endpoint.state();
        if state.is_closing() {
            return Err(CoreError::IllegalState { state, operation });
        }
        Ok(())
    }

    /// Replace the source terms. Only before the link is attached.
    pub(crate) fn set_source(&mut self, source: Option<Source>) -> Result<(), CoreError> {
        self.ensure_not_attached("set source")?;
        self.source = source;
        Ok(())
    }

    /// Replace the target terms. Only before the link is attached.
    pub(crate) fn set_target(&mut self, target: Option<Target>) -> Result<(), CoreError> {
        self.ensure_not_attached("set target")?;
        self.target = target;
        Ok(())
    }

    pub(crate) fn set_auto_settle(&mut self, auto_settle: bool) -> Result<(), CoreError> {
        self.ensure_usable("set auto-settle")?;
        self.auto_settle = auto_settle;
        Ok(())
    }

    pub(crate) fn set_receive_mode(&mut self, mode: ReceiveMode) -> Result<(), CoreError> {
        self.ensure_usable("set receive mode")?;
        let link = self.id;
        let LinkKind::Receiver(receiver) = &mut self.kind else {
            return Err(CoreError::WrongRole { link, expected: Role::Receiver });
        };
        receiver.mode = mode;
        Ok(())
    }

    fn attach_frame(&self) -> ConnectionAction {
        ConnectionAction::SendFrame(Performative::Attach {
            channel: self.session,
            handle: self.id,
            name: self.name.clone(),
            role: self.role(),
            source: self.source.clone(),
            target: self.target.clone(),
        })
    }

    fn disposition_frame(
        &self,
        tag: DeliveryTag,
        state: Option<Outcome>,
        settled: bool,
    ) -> ConnectionAction {
        ConnectionAction::SendFrame(Performative::Disposition {
            channel: self.session,
            handle: self.id,
            role: self.role(),
            tag,
            state,
            settled,
        })
    }

    /// Attach the link.
    ///
    /// Credit granted before the attach is advertised right after it, and
    /// queued transfers go out if the peer already granted credit.
    ///
    /// # Errors
    ///
    /// `IllegalState` unless the link is unopened or only remotely opened.
    pub(crate) fn open(&mut self) -> Result<Actions, CoreError> {
        let state = self.endpoint.open_local("open link")?;
        debug!(link = %self.id, name = %self.name, ?state, "link opened locally");

        let mut actions = vec![self.attach_frame()];
        match &self.kind {
            LinkKind::Receiver(receiver) => {
                let flow = receiver.credit.flow_state();
                if flow.link_credit > 0 {
                    actions.push(ConnectionAction::SendFrame(Performative::Flow {
                        channel: self.session,
                        handle: self.id,
                        delivery_count: flow.delivery_count,
                        link_credit: flow.link_credit,
                    }));
                }
            },
            LinkKind::Sender(_) => {
                self.drain_pending(&mut actions);
                let owed = match &mut self.kind {
                    LinkKind::Sender(sender) => std::mem::take(&mut sender.drain_owed),
                    LinkKind::Receiver(_) => false,
                };
                if owed && !self.send_queue_full() {
                    actions.push(ConnectionAction::Notify(ConnectionEvent::SendQueueDrained(
                        self.id,
                    )));
                }
            },
        }

        if state == EndpointState::Active {
            actions.push(ConnectionAction::Notify(ConnectionEvent::LinkActive(self.id)));
        }
        Ok(actions)
    }

    /// Detach the link.
    ///
    /// Cancels the ledger and reports every unsettled delivery as aborted.
    /// A link the peer attached but we never answered is answered with an
    /// attach before the detach.
    ///
    /// # Errors
    ///
    /// `IllegalState` if the link was already closed locally.
    pub(crate) fn close(&mut self, condition: Option<ErrorCondition>) -> Result<Actions, CoreError> {
        let announced = self.endpoint.ever_locally_opened();
        let state = self.endpoint.close_local("close link")?;
        debug!(link = %self.id, ?state, unsettled = self.deliveries.len(), "link closed locally");

        let mut actions = Vec::new();
        if announced || self.remote.is_some() {
            if !announced {
                actions.push(self.attach_frame());
            }
            actions.push(ConnectionAction::SendFrame(Performative::Detach {
                channel: self.session,
                handle: self.id,
                error: condition,
            }));
        }
        actions.extend(self.abort_all(Abort::LinkClosed));
        Ok(actions)
    }

    /// Force the link closed without frames; the session or connection
    /// underneath it is gone.
    pub(crate) fn teardown(&mut self, reason: Abort) -> Actions {
        if self.endpoint.state().is_closed() {
            return Vec::new();
        }
        self.endpoint.force_closed();
        self.abort_all(reason)
    }

    fn abort_all(&mut self, reason: Abort) -> Actions {
        match &mut self.kind {
            LinkKind::Sender(sender) => {
                sender.credit.cancel();
                sender.pending.clear();
            },
            LinkKind::Receiver(receiver) => receiver.credit.cancel(),
        }

        self.deliveries
            .drain()
            .into_iter()
            .map(|delivery| {
                ConnectionAction::Notify(ConnectionEvent::DeliveryUpdated {
                    delivery: self.handle(delivery.id()),
                    update: DeliveryUpdate::Aborted(reason),
                })
            })
            .collect()
    }

    /// Queue a delivery for transmission.
    ///
    /// # Errors
    ///
    /// - `IllegalState` once the link is closing
    /// - `WrongRole` on a receiver
    /// - `DuplicateTag` if `tag` belongs to an unsettled delivery
    pub(crate) fn send(
        &mut self,
        tag: Option<DeliveryTag>,
        payload: Bytes,
        notify: bool,
    ) -> Result<(DeliveryHandle, Actions), CoreError> {
        self.ensure_usable("send")?;
        let link = self.id;
        let LinkKind::Sender(sender) = &mut self.kind else {
            return Err(CoreError::WrongRole { link, expected: Role::Sender });
        };

        let tag = match tag {
            Some(tag) => tag,
            None => sender.generate_tag(&self.deliveries),
        };
        let delivery = self.deliveries.register(tag.clone(), notify)?;
        trace!(%link, %tag, queued = sender.pending.len(), "delivery queued");
        sender.pending.push_back(PendingTransfer { delivery, tag, payload });

        let mut actions = Vec::new();
        self.drain_pending(&mut actions);
        Ok((self.handle(delivery), actions))
    }

    /// Transmit queued transfers while credit lasts.
    fn drain_pending(&mut self, actions: &mut Actions) {
        let LinkKind::Sender(sender) = &mut self.kind else {
            return;
        };
        if !self.endpoint.locally_opened() {
            return;
        }

        while sender.credit.available() > 0 {
            let Some(next) = sender.pending.pop_front() else {
                break;
            };
            if let Err(err) = sender.credit.consume(1) {
                warn!(link = %self.id, %err, "credit check failed while draining");
                sender.pending.push_front(next);
                break;
            }

            trace!(link = %self.id, tag = %next.tag, "transfer");
            actions.push(ConnectionAction::SendFrame(Performative::Transfer {
                channel: self.session,
                handle: self.id,
                tag: next.tag,
                payload: next.payload,
                settled: false,
            }));
        }
    }

    /// Grant the peer `additional` more deliveries.
    ///
    /// The flow is advertised at once when attached, otherwise right after
    /// the attach.
    ///
    /// # Errors
    ///
    /// - `IllegalState` once the link is closing
    /// - `WrongRole` on a sender
    pub(crate) fn flow(&mut self, additional: u32) -> Result<Actions, CoreError> {
        self.ensure_usable("flow")?;
        let link = self.id;
        let LinkKind::Receiver(receiver) = &mut self.kind else {
            return Err(CoreError::WrongRole { link, expected: Role::Receiver });
        };

        let flow = receiver.credit.grant(additional)?;
        trace!(%link, additional, credit = flow.link_credit, "credit granted");

        if !self.endpoint.locally_opened() {
            return Ok(Vec::new());
        }
        Ok(vec![ConnectionAction::SendFrame(Performative::Flow {
            channel: self.session,
            handle: link,
            delivery_count: flow.delivery_count,
            link_credit: flow.link_credit,
        })])
    }

    /// Settle a delivery locally.
    ///
    /// Settling an outbound delivery that is still queued withdraws it. No
    /// frame is needed for a delivery the peer already settled.
    ///
    /// # Errors
    ///
    /// - `IllegalState` once the link is closing
    /// - `UnknownDelivery` if the delivery is not outstanding
    pub(crate) fn settle(
        &mut self,
        delivery: DeliveryId,
        outcome: Option<Outcome>,
    ) -> Result<Actions, CoreError> {
        self.ensure_usable("settle")?;
        let settled = self.deliveries.settle(delivery, outcome.clone())?;
        debug!(link = %self.id, tag = %settled.tag(), ?outcome, "delivery settled locally");

        if settled.direction() == Direction::Outbound {
            if let LinkKind::Sender(sender) = &mut self.kind {
                if let Some(index) = sender.pending.iter().position(|p| p.delivery == delivery) {
                    sender.pending.remove(index);
                    return Ok(Vec::new());
                }
            }
            if settled.remotely_settled() {
                return Ok(Vec::new());
            }
        }
        Ok(vec![self.disposition_frame(settled.tag().clone(), outcome, true)])
    }

    /// The peer attached its end.
    ///
    /// # Errors
    ///
    /// `IllegalState` if the peer already attached.
    pub(crate) fn on_remote_open(
        &mut self,
        remote: RemoteLinkRef,
        source: Option<Source>,
        target: Option<Target>,
    ) -> Result<Actions, CoreError> {
        let state = self.endpoint.open_remote()?;
        debug!(link = %self.id, name = %self.name, ?state, "link opened remotely");

        self.remote = Some(remote);
        self.remote_source = source;
        self.remote_target = target;

        if state == EndpointState::Active {
            return Ok(vec![ConnectionAction::Notify(ConnectionEvent::LinkActive(self.id))]);
        }
        Ok(Vec::new())
    }

    /// The peer detached its end.
    ///
    /// When we had not closed yet, pending deliveries are aborted and the
    /// application is told; it answers with its own close.
    pub(crate) fn on_remote_close(&mut self, condition: Option<ErrorCondition>) -> Actions {
        if self.endpoint.state().is_closed() {
            trace!(link = %self.id, "detach for closed link ignored");
            return Vec::new();
        }

        let state = self.endpoint.close_remote();
        debug!(link = %self.id, ?state, ?condition, "link closed remotely");
        if state.is_closed() {
            return Vec::new();
        }

        let mut actions = self.abort_all(Abort::LinkClosed);
        actions.push(ConnectionAction::Notify(ConnectionEvent::LinkClosed {
            link: self.id,
            condition,
        }));
        actions
    }

    /// Apply a flow from the peer.
    pub(crate) fn on_flow(&mut self, delivery_count: u32, link_credit: u32) -> Actions {
        let LinkKind::Sender(sender) = &mut self.kind else {
            trace!(link = %self.id, "sender flow state ignored on receiving link");
            return Vec::new();
        };

        let transition = match sender.credit.replenish(delivery_count, link_credit) {
            Ok(transition) => transition,
            Err(err) => {
                trace!(link = %self.id, %err, "flow ignored");
                return Vec::new();
            },
        };
        trace!(link = %self.id, delivery_count, link_credit, ?transition, "peer flow");

        let mut actions = Vec::new();
        self.drain_pending(&mut actions);

        if transition == CreditTransition::Replenished {
            if !self.send_queue_full() {
                actions.push(ConnectionAction::Notify(ConnectionEvent::SendQueueDrained(self.id)));
            } else if let LinkKind::Sender(sender) = &mut self.kind {
                sender.drain_owed |= !self.endpoint.locally_opened();
            }
        }
        actions
    }

    /// Apply a disposition from the peer.
    pub(crate) fn on_disposition(
        &mut self,
        tag: &DeliveryTag,
        state: Option<Outcome>,
        settled: bool,
    ) -> Actions {
        match self.deliveries.on_disposition_update(tag, state, settled, self.auto_settle) {
            DispositionChange::Ignored => Vec::new(),
            DispositionChange::Updated { id, view, notify, removed } => {
                trace!(link = %self.id, %tag, state = ?view.remote_state, removed, "disposition");
                if !notify {
                    return Vec::new();
                }
                vec![ConnectionAction::Notify(ConnectionEvent::DeliveryUpdated {
                    delivery: self.handle(id),
                    update: DeliveryUpdate::Disposition {
                        state: view.remote_state,
                        remotely_settled: view.remotely_settled,
                        locally_settled: view.locally_settled,
                    },
                })]
            },
        }
    }

    /// Accept one transfer from the peer.
    pub(crate) fn on_transfer(&mut self, tag: DeliveryTag, payload: &[u8], settled: bool) -> Actions {
        let link = self.id;
        if self.endpoint.state().is_closing() {
            trace!(%link, %tag, "transfer for closing link ignored");
            return Vec::new();
        }
        let LinkKind::Receiver(receiver) = &mut self.kind else {
            warn!(%link, %tag, "transfer on sending link ignored");
            return Vec::new();
        };

        let mode = receiver.mode;
        let admitted = receiver.credit.on_transfer();
        if let Err(err) = admitted {
            warn!(%link, %tag, %err, "peer exceeded granted credit");
            return self.fail(ErrorCondition::transfer_limit_exceeded());
        }

        let message = match Message::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(%link, %tag, %err, "undecodable message");
                if settled {
                    return Vec::new();
                }
                let outcome =
                    Outcome::Rejected { error: Some(ErrorCondition::decode_error(err.to_string())) };
                return vec![self.disposition_frame(tag, Some(outcome), true)];
            },
        };

        if settled {
            let delivery = self.deliveries.allocate_untracked();
            return vec![ConnectionAction::Notify(ConnectionEvent::Message {
                delivery: self.handle(delivery),
                message,
                settle: None,
            })];
        }

        let delivery = match self.deliveries.observe(tag.clone()) {
            Ok(delivery) => delivery,
            Err(err) => {
                warn!(%link, %err, "transfer reuses an unsettled tag");
                return self.fail(ErrorCondition::illegal_state(format!(
                    "delivery tag {tag} is still unsettled"
                )));
            },
        };
        let handle = self.handle(delivery);

        if mode == ReceiveMode::Synchronous && self.auto_settle {
            let mut actions = vec![ConnectionAction::Notify(ConnectionEvent::Message {
                delivery: handle,
                message,
                settle: None,
            })];
            if self.deliveries.settle(delivery, Some(Outcome::Accepted)).is_ok() {
                actions.push(self.disposition_frame(tag, Some(Outcome::Accepted), true));
            }
            return actions;
        }

        vec![ConnectionAction::Notify(ConnectionEvent::Message {
            delivery: handle,
            message,
            settle: Some(SettleToken::new(handle)),
        })]
    }

    /// Detach after a peer violation and tell the application why.
    fn fail(&mut self, condition: ErrorCondition) -> Actions {
        match self.close(Some(condition.clone())) {
            Ok(mut actions) => {
                actions.push(ConnectionAction::Notify(ConnectionEvent::LinkClosed {
                    link: self.id,
                    condition: Some(condition),
                }));
                actions
            },
            Err(err) => {
                trace!(link = %self.id, %err, "link already closing");
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: SessionId = SessionId(0);
    const REMOTE: RemoteLinkRef = RemoteLinkRef { channel: SessionId(4), handle: LinkId(9) };

    fn active_sender() -> Link {
        let mut link = Link::sender(LinkId(1), SESSION, "out".into(), true);
        link.open().unwrap();
        link.on_remote_open(REMOTE, None, None).unwrap();
        link
    }

    fn active_receiver() -> Link {
        let mut link = Link::receiver(LinkId(2), SESSION, "in".into(), true);
        link.open().unwrap();
        link.on_remote_open(REMOTE, None, None).unwrap();
        link
    }

    fn payload(text: &str) -> Bytes {
        Message::text("queue", text).encode().unwrap()
    }

    fn transfers(actions: &[ConnectionAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, ConnectionAction::SendFrame(Performative::Transfer { .. })))
            .count()
    }

    fn drained(actions: &[ConnectionAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, ConnectionAction::Notify(ConnectionEvent::SendQueueDrained(_))))
            .count()
    }

    #[test]
    fn send_without_credit_is_queued_then_drained_in_order() {
        let mut link = active_sender();

        let (_, first) = link.send(Some("a".into()), payload("1"), true).unwrap();
        let (_, second) = link.send(Some("b".into()), payload("2"), true).unwrap();
        assert_eq!(transfers(&first) + transfers(&second), 0);
        assert!(link.send_queue_full());

        let actions = link.on_flow(0, 1);
        let tags: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::SendFrame(Performative::Transfer { tag, .. }) => Some(tag.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tags, vec![DeliveryTag::from("a")]);
        // All credit went to the queue, so nothing to report.
        assert_eq!(drained(&actions), 0);
        assert!(link.send_queue_full());

        let actions = link.on_flow(1, 2);
        assert_eq!(transfers(&actions), 1);
        assert_eq!(drained(&actions), 1);
        assert!(!link.send_queue_full());
        assert_eq!(link.credit(), 1);
    }

    #[test]
    fn drain_reported_once_per_replenish() {
        let mut link = active_sender();

        assert_eq!(drained(&link.on_flow(0, 5)), 1);
        assert_eq!(drained(&link.on_flow(0, 10)), 0);
    }

    #[test]
    fn generated_tags_skip_outstanding_ones() {
        let mut link = active_sender();
        link.on_flow(0, 10);

        link.send(Some(DeliveryTag::from_counter(0)), payload("x"), true).unwrap();
        let (handle, actions) = link.send(None, payload("y"), true).unwrap();

        match actions.first() {
            Some(ConnectionAction::SendFrame(Performative::Transfer { tag, .. })) => {
                assert_eq!(*tag, DeliveryTag::from_counter(1));
            },
            other => panic!("unexpected action: {other:?}"),
        }
        assert_eq!(handle.link, LinkId(1));
    }

    #[test]
    fn duplicate_tag_is_reported_to_caller() {
        let mut link = active_sender();
        link.send(Some("t".into()), payload("x"), true).unwrap();

        let err = link.send(Some("t".into()), payload("y"), true).unwrap_err();
        assert_eq!(err, CoreError::DuplicateTag("t".into()));
    }

    #[test]
    fn settling_a_queued_delivery_withdraws_it() {
        let mut link = active_sender();
        let (handle, _) = link.send(Some("t".into()), payload("x"), true).unwrap();

        let actions = link.settle(handle.delivery, None).unwrap();
        assert!(actions.is_empty());

        assert_eq!(transfers(&link.on_flow(0, 1)), 0);
        assert_eq!(link.unsettled(), 0);
    }

    #[test]
    fn remote_settlement_is_reported_and_auto_settled() {
        let mut link = active_sender();
        link.on_flow(0, 1);
        let (handle, _) = link.send(Some("t".into()), payload("x"), true).unwrap();

        let actions = link.on_disposition(&"t".into(), Some(Outcome::Accepted), true);
        match actions.as_slice() {
            [ConnectionAction::Notify(ConnectionEvent::DeliveryUpdated { delivery, update })] => {
                assert_eq!(*delivery, handle);
                assert_eq!(
                    *update,
                    DeliveryUpdate::Disposition {
                        state: Some(Outcome::Accepted),
                        remotely_settled: true,
                        locally_settled: true,
                    }
                );
            },
            other => panic!("unexpected actions: {other:?}"),
        }
        assert_eq!(link.unsettled(), 0);
        assert!(link.on_disposition(&"t".into(), Some(Outcome::Accepted), true).is_empty());
    }

    #[test]
    fn close_aborts_every_unsettled_delivery() {
        let mut link = active_sender();
        link.on_flow(0, 2);
        for tag in ["a", "b", "c"] {
            link.send(Some(tag.into()), payload(tag), false).unwrap();
        }

        let actions = link.close(None).unwrap();
        let aborted = actions
            .iter()
            .filter(|a| {
                matches!(
                    a,
                    ConnectionAction::Notify(ConnectionEvent::DeliveryUpdated {
                        update: DeliveryUpdate::Aborted(Abort::LinkClosed),
                        ..
                    })
                )
            })
            .count();
        assert_eq!(aborted, 3);
        assert_eq!(link.unsettled(), 0);
        assert!(matches!(
            actions.first(),
            Some(ConnectionAction::SendFrame(Performative::Detach { .. }))
        ));

        assert!(matches!(
            link.send(None, payload("late"), true),
            Err(CoreError::IllegalState { state: EndpointState::LocallyClosing, .. })
        ));
    }

    #[test]
    fn receiver_flow_before_open_follows_attach() {
        let mut link = Link::receiver(LinkId(2), SESSION, "in".into(), true);
        assert!(link.flow(3).unwrap().is_empty());

        let actions = link.open().unwrap();
        assert!(matches!(actions[0], ConnectionAction::SendFrame(Performative::Attach { .. })));
        assert!(matches!(
            actions[1],
            ConnectionAction::SendFrame(Performative::Flow { link_credit: 3, .. })
        ));
    }

    #[test]
    fn zero_grant_still_sends_flow() {
        let mut link = active_receiver();
        link.flow(2).unwrap();

        let actions = link.flow(0).unwrap();
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::SendFrame(Performative::Flow { link_credit: 2, .. })]
        ));
        assert_eq!(link.credit(), 2);
    }

    #[test]
    fn synchronous_receiver_accepts_after_reporting() {
        let mut link = active_receiver();
        link.flow(1).unwrap();

        let actions = link.on_transfer("t".into(), &payload("Hello"), false);
        match actions.as_slice() {
            [
                ConnectionAction::Notify(ConnectionEvent::Message { message, settle: None, .. }),
                ConnectionAction::SendFrame(Performative::Disposition {
                    state: Some(Outcome::Accepted),
                    settled: true,
                    ..
                }),
            ] => assert_eq!(message.body_text(), Some("Hello")),
            other => panic!("unexpected actions: {other:?}"),
        }
        assert_eq!(link.unsettled(), 0);
        assert_eq!(link.credit(), 0);
    }

    #[test]
    fn deferred_receiver_hands_out_token() {
        let mut link = active_receiver();
        link.set_receive_mode(ReceiveMode::Deferred).unwrap();
        link.flow(1).unwrap();

        let actions = link.on_transfer("t".into(), &payload("Hello"), false);
        let token = match actions.into_iter().next() {
            Some(ConnectionAction::Notify(ConnectionEvent::Message { settle: Some(token), .. })) => {
                token
            },
            other => panic!("unexpected action: {other:?}"),
        };
        assert_eq!(link.unsettled(), 1);

        let actions = link.settle(token.handle().delivery, Some(Outcome::Released)).unwrap();
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::SendFrame(Performative::Disposition {
                state: Some(Outcome::Released),
                ..
            })]
        ));
        assert_eq!(link.unsettled(), 0);
    }

    #[test]
    fn presettled_transfer_is_not_tracked() {
        let mut link = active_receiver();
        link.set_receive_mode(ReceiveMode::Deferred).unwrap();
        link.flow(1).unwrap();

        let actions = link.on_transfer("t".into(), &payload("x"), true);
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Notify(ConnectionEvent::Message { settle: None, .. })]
        ));
        assert_eq!(link.unsettled(), 0);
    }

    #[test]
    fn transfer_beyond_credit_detaches() {
        let mut link = active_receiver();

        let actions = link.on_transfer("t".into(), &payload("x"), false);
        assert!(actions.iter().any(|a| matches!(
            a,
            ConnectionAction::SendFrame(Performative::Detach { error: Some(condition), .. })
                if condition.condition == linkflow_proto::symbol::TRANSFER_LIMIT_EXCEEDED
        )));
        assert!(actions.iter().any(|a| matches!(
            a,
            ConnectionAction::Notify(ConnectionEvent::LinkClosed { .. })
        )));
        assert_eq!(link.state(), EndpointState::LocallyClosing);
    }

    #[test]
    fn reused_unsettled_tag_detaches() {
        let mut link = active_receiver();
        link.set_receive_mode(ReceiveMode::Deferred).unwrap();
        link.flow(2).unwrap();
        link.on_transfer("t".into(), &payload("first"), false);

        let actions = link.on_transfer("t".into(), &payload("second"), false);
        assert!(actions.iter().any(|a| matches!(
            a,
            ConnectionAction::SendFrame(Performative::Detach { error: Some(condition), .. })
                if condition.condition == linkflow_proto::symbol::ILLEGAL_STATE
        )));
        assert!(!actions.iter().any(|a| matches!(
            a,
            ConnectionAction::Notify(ConnectionEvent::Message { .. })
        )));
        assert_eq!(link.state(), EndpointState::LocallyClosing);
        assert_eq!(link.unsettled(), 0);
    }

    #[test]
    fn credit_granted_before_attach_reports_drain_at_open() {
        let mut link = Link::sender(LinkId(1), SESSION, "out".into(), true);
        link.on_remote_open(REMOTE, None, None).unwrap();
        link.send(Some("a".into()), payload("1"), true).unwrap();

        let actions = link.on_flow(0, 5);
        assert_eq!(transfers(&actions) + drained(&actions), 0);
        assert!(link.send_queue_full());

        let actions = link.open().unwrap();
        assert_eq!(transfers(&actions), 1);
        assert_eq!(drained(&actions), 1);
        assert!(!link.send_queue_full());
        assert_eq!(link.credit(), 4);

        assert_eq!(drained(&link.on_flow(1, 10)), 0);
    }

    #[test]
    fn short_credit_before_attach_owes_no_drain() {
        let mut link = Link::sender(LinkId(1), SESSION, "out".into(), true);
        link.on_remote_open(REMOTE, None, None).unwrap();
        link.send(Some("a".into()), payload("1"), true).unwrap();
        link.send(Some("b".into()), payload("2"), true).unwrap();
        link.on_flow(0, 1);

        let actions = link.open().unwrap();
        assert_eq!(transfers(&actions), 1);
        assert_eq!(drained(&actions), 0);
        assert!(link.send_queue_full());

        let actions = link.on_flow(1, 1);
        assert_eq!(transfers(&actions), 1);
        assert_eq!(drained(&actions), 0);
    }

    #[test]
    fn undecodable_message_is_rejected() {
        let mut link = active_receiver();
        link.flow(1).unwrap();

        let actions = link.on_transfer("t".into(), b"\xff\xff", false);
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::SendFrame(Performative::Disposition {
                state: Some(Outcome::Rejected { error: Some(_) }),
                settled: true,
                ..
            })]
        ));
    }

    #[test]
    fn unanswered_peer_link_is_refused_with_attach_and_detach() {
        let mut link = Link::sender(LinkId(3), SESSION, "peer".into(), true);
        link.on_remote_open(REMOTE, None, None).unwrap();

        let actions = link.close(Some(ErrorCondition::not_supported())).unwrap();
        assert!(matches!(
            actions.as_slice(),
            [
                ConnectionAction::SendFrame(Performative::Attach { .. }),
                ConnectionAction::SendFrame(Performative::Detach { error: Some(_), .. }),
            ]
        ));
    }

    #[test]
    fn teardown_aborts_with_connection_closed() {
        let mut link = active_sender();
        link.send(None, payload("x"), false).unwrap();

        let actions = link.teardown(Abort::ConnectionClosed);
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Notify(ConnectionEvent::DeliveryUpdated {
                update: DeliveryUpdate::Aborted(Abort::ConnectionClosed),
                ..
            })]
        ));
        assert!(link.state().is_closed());
        assert!(link.teardown(Abort::ConnectionClosed).is_empty());
    }
}
