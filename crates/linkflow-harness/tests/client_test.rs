//! Client behaviour against the scripted server.
//!
//! Each test drives a client connection through the in-memory loopback:
//! - identification and anonymous-relay discovery at open
//! - local and remote disconnect
//! - request/response through the echo address
//! - deferred settlement throttled by credit
//! - anonymous senders

use linkflow_core::{ConnectionConfig, ConnectionEvent, EndpointState, ReceiveMode, SettleToken};
use linkflow_harness::{Loopback, MockServerConfig, PRODUCT_PROPERTY, addresses};
use linkflow_proto::{LinkId, Message, Outcome, Symbol};

fn opened(client: ConnectionConfig, server: MockServerConfig) -> Loopback {
    let mut pair = Loopback::with_config(7, client, server);
    pair.client_mut().open().unwrap();
    pair.run();
    pair
}

/// Received message bodies and their settle tokens.
fn messages(events: Vec<ConnectionEvent>) -> Vec<(String, Option<SettleToken>)> {
    events
        .into_iter()
        .filter_map(|event| match event {
            ConnectionEvent::Message { message, settle, .. } => {
                Some((message.body_text().unwrap_or_default().to_owned(), settle))
            },
            _ => None,
        })
        .collect()
}

fn disconnects(events: &[ConnectionEvent]) -> usize {
    events.iter().filter(|event| **event == ConnectionEvent::Disconnected).count()
}

/// Deferred-mode receiver on its own session, granted `credit`.
fn deferred_receiver(pair: &mut Loopback, source: &str, credit: u32) -> LinkId {
    let client = pair.client_mut();
    let session = client.session().unwrap();
    client.open_session(session).unwrap();
    let receiver = client.create_named_receiver(session, None, Some(source)).unwrap();
    client.set_receive_mode(receiver, ReceiveMode::Deferred).unwrap();
    client.flow(receiver, credit).unwrap();
    client.open_link(receiver).unwrap();
    pair.run();
    receiver
}

#[test]
fn client_identification() {
    let mut pair =
        opened(ConnectionConfig::default().with_container_id("foo"), MockServerConfig::default());

    assert_eq!(pair.client().container_id(), "foo");
    // The mock server answers with a pong container id
    assert_eq!(pair.client().remote_container(), Some("pong: foo"));
    assert_eq!(pair.client().state(), EndpointState::Active);
    assert_eq!(
        pair.take_client_events(),
        vec![ConnectionEvent::Opened { remote_container: "pong: foo".into(), anonymous_relay: true }]
    );

    pair.client_mut().disconnect();
    pair.run();
    assert_eq!(pair.take_client_events(), vec![ConnectionEvent::Disconnected]);
}

#[test]
fn open_exchanges_properties_and_desired_capabilities() {
    let mut client = ConnectionConfig::default().with_property("client-version", "1.2");
    client.desired_capabilities.push(Symbol::anonymous_relay());
    let pair = opened(client, MockServerConfig::default());

    let product = pair.client().remote_properties().get(&Symbol::new(PRODUCT_PROPERTY));
    assert_eq!(product.map(String::as_str), Some("linkflow-mock-server"));
    assert!(pair.client().remote_desired_capabilities().is_empty());

    let server = pair.server();
    let version = server.remote_properties().get(&Symbol::new("client-version"));
    assert_eq!(version.map(String::as_str), Some("1.2"));
    assert_eq!(server.remote_desired_capabilities(), [Symbol::anonymous_relay()]);
}

#[test]
fn remote_disconnect_is_reported_once() {
    let mut pair = opened(ConnectionConfig::default(), MockServerConfig::default());
    assert!(!pair.client().is_disconnected());

    // Ask the server to disconnect us
    let sender = pair.client_mut().create_sender(None).unwrap();
    pair.client_mut().open_link(sender).unwrap();
    pair.client_mut().send(sender, &Message::text(addresses::COMMAND, "disconnect")).unwrap();
    pair.run();

    let events = pair.take_client_events();
    assert_eq!(disconnects(&events), 1);
    assert!(pair.client().is_disconnected());
    assert!(pair.server().is_disconnected());
}

#[test]
fn local_disconnect_is_reported_once() {
    let mut pair = opened(ConnectionConfig::default(), MockServerConfig::default());
    pair.take_client_events();

    pair.client_mut().disconnect();
    pair.client_mut().disconnect();
    pair.run();

    assert_eq!(pair.take_client_events(), vec![ConnectionEvent::Disconnected]);
    assert!(pair.client().is_disconnected());
    assert!(pair.server().is_disconnected());
    assert!(pair.is_severed());
}

fn send_receive_echo(data: &str) {
    let mut pair = opened(ConnectionConfig::default(), MockServerConfig::default());
    pair.take_client_events();

    let client = pair.client_mut();
    let session = client.session().unwrap();
    client.open_session(session).unwrap();
    let receiver = client.create_named_receiver(session, None, Some(addresses::ECHO)).unwrap();
    client.flow(receiver, 10).unwrap();
    client.open_link(receiver).unwrap();
    let sender = client.create_named_sender(session, None, None).unwrap();
    client.open_link(sender).unwrap();
    client.send(sender, &Message::text(addresses::ECHO, data)).unwrap();
    pair.run();

    let received = messages(pair.take_client_events());
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, data);
    // Synchronous mode with auto-settle: nothing left for the application
    assert!(received[0].1.is_none());
    assert_eq!(pair.client().unsettled(receiver).unwrap(), 0);
}

#[test]
fn request_response() {
    send_receive_echo("Hello World");
}

#[test]
fn transfer_large_message() {
    let data: String = (0..256 * 1024usize).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    send_receive_echo(&data);
}

#[test]
fn receiver_async_settle() {
    let mut pair = opened(ConnectionConfig::default(), MockServerConfig::default());
    pair.take_client_events();

    let receiver = deferred_receiver(&mut pair, addresses::TWO_MESSAGES, 1);
    let mut received = messages(pair.take_client_events());
    assert_eq!(received.len(), 1);
    let (body, token) = received.remove(0);
    assert_eq!(body, "Hello");
    assert_eq!(pair.client().credit(receiver).unwrap(), 0);

    // Only one credit was granted; nothing more arrives while we hold it
    pair.run();
    assert!(messages(pair.take_client_events()).is_empty());

    // A zero grant is still advertised and releases nothing
    pair.client_mut().flow(receiver, 0).unwrap();
    pair.run();
    assert!(messages(pair.take_client_events()).is_empty());
    assert_eq!(pair.client().credit(receiver).unwrap(), 0);

    pair.client_mut().settle(token.unwrap(), Outcome::Accepted).unwrap();
    pair.run();
    assert!(messages(pair.take_client_events()).is_empty());
    assert_eq!(pair.client().unsettled(receiver).unwrap(), 0);

    pair.client_mut().flow(receiver, 1).unwrap();
    pair.run();
    let received = messages(pair.take_client_events());
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "World");

    pair.client_mut().disconnect();
    pair.run();
}

#[test]
fn receiver_async_settle_after_receiving_multiple_messages() {
    let mut pair = opened(ConnectionConfig::default(), MockServerConfig::default());
    pair.take_client_events();

    let receiver = deferred_receiver(&mut pair, addresses::FIVE_MESSAGES, 4);
    let received = messages(pair.take_client_events());
    let bodies: Vec<_> = received.iter().map(|(body, _)| body.as_str()).collect();
    assert_eq!(bodies, ["1", "2", "3", "4"]);
    assert_eq!(pair.client().unsettled(receiver).unwrap(), 4);

    // Settling frees nothing by itself; credit is only raised by flow
    let mut tokens: Vec<_> = received.into_iter().filter_map(|(_, token)| token).collect();
    let fourth = tokens.pop().unwrap();
    pair.client_mut().settle(fourth, Outcome::Accepted).unwrap();
    pair.run();
    assert!(messages(pair.take_client_events()).is_empty());

    pair.client_mut().flow(receiver, 1).unwrap();
    pair.run();
    let received = messages(pair.take_client_events());
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "5");

    for token in tokens {
        pair.client_mut().settle(token, Outcome::Accepted).unwrap();
    }
    assert_eq!(pair.client().unsettled(receiver).unwrap(), 1);
}

#[test]
fn anonymous_relay_is_supported() {
    let mut pair = Loopback::new(3);
    assert!(!pair.client().is_anonymous_relay_supported());

    pair.client_mut().open().unwrap();
    assert!(!pair.client().is_anonymous_relay_supported());
    pair.run();
    assert!(pair.client().is_anonymous_relay_supported());
}

#[test]
fn anonymous_relay_is_not_supported() {
    let server = MockServerConfig { anonymous_relay: false, ..MockServerConfig::default() };
    let mut pair = Loopback::with_config(4, ConnectionConfig::default(), server);
    assert!(!pair.client().is_anonymous_relay_supported());

    pair.client_mut().open().unwrap();
    pair.run();
    assert!(!pair.client().is_anonymous_relay_supported());

    let expected = format!("pong: {}", pair.client().container_id());
    assert_eq!(
        pair.take_client_events(),
        vec![ConnectionEvent::Opened { remote_container: expected, anonymous_relay: false }]
    );
}

#[test]
fn default_anonymous_sender_specifies_link_target() {
    let mut pair = opened(ConnectionConfig::default(), MockServerConfig::default());

    // Send straight away: the delivery is buffered until the peer attaches
    // and grants credit
    let sender = pair.client_mut().default_sender().unwrap();
    pair.client_mut().send(sender, &Message::text("ignored", "content")).unwrap();
    assert!(pair.client().send_queue_full(sender).unwrap());
    pair.run();

    let receivers = pair.mock().receivers().to_vec();
    assert_eq!(receivers.len(), 1);
    let target = pair.server().remote_target(receivers[0]).unwrap();
    let target = target.expect("client did not set a link target");
    assert_eq!(target.address, None);

    let received = pair.mock().received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body_text(), Some("content"));
}

#[test]
fn sender_waits_for_credit_and_reports_drain() {
    let server = MockServerConfig { receiver_credit: 0, ..MockServerConfig::default() };
    let mut pair = opened(ConnectionConfig::default(), server);
    pair.take_client_events();

    let sender = pair.client_mut().create_sender(Some("queue")).unwrap();
    pair.client_mut().open_link(sender).unwrap();
    pair.run();
    assert!(pair.client().send_queue_full(sender).unwrap());

    let server_receiver = pair.mock().receivers()[0];
    pair.server_mut().flow(server_receiver, 2).unwrap();
    pair.run();

    let events = pair.take_client_events();
    assert!(events.contains(&ConnectionEvent::SendQueueDrained(sender)));
    assert!(!pair.client().send_queue_full(sender).unwrap());
    assert_eq!(pair.client().credit(sender).unwrap(), 2);
}
