//! Scripted scenarios checked by oracles.

use linkflow_core::{ConnectionConfig, ReceiveMode};
use linkflow_harness::{
    MockServerConfig, Observed, Scenario, World, addresses,
    scenario::oracle::{all_of, disconnected_once, messages_are, remote_container_is},
};
use linkflow_proto::{Message, Outcome};

fn err(e: impl std::fmt::Display) -> String {
    e.to_string()
}

/// Deferred receiver on the default session.
fn deferred_receiver(world: &mut World, source: &str, credit: u32) -> Result<(), String> {
    let client = world.client_mut();
    let receiver = client.create_receiver(source).map_err(err)?;
    client.set_receive_mode(receiver, ReceiveMode::Deferred).map_err(err)?;
    client.flow(receiver, credit).map_err(err)?;
    client.open_link(receiver).map_err(err)
}

#[test]
fn identification_then_local_disconnect() {
    Scenario::new("identification")
        .client(ConnectionConfig::default().with_container_id("foo"))
        .script(Box::new(|world| world.open()))
        .script(Box::new(|world| {
            world.client_mut().disconnect();
            Ok(())
        }))
        .oracle(all_of(vec![remote_container_is("pong: foo"), disconnected_once()]))
        .run()
        .unwrap();
}

#[test]
fn echo_round_trip() {
    Scenario::new("echo")
        .seed(11)
        .script(Box::new(|world| world.open()))
        .script(Box::new(|world| {
            let client = world.client_mut();
            let receiver = client.create_receiver(addresses::ECHO).map_err(err)?;
            client.flow(receiver, 10).map_err(err)?;
            client.open_link(receiver).map_err(err)
        }))
        .script(Box::new(|world| {
            let client = world.client_mut();
            let sender = client.default_sender().map_err(err)?;
            client.send(sender, &Message::text(addresses::ECHO, "ping")).map_err(err)?;
            client.send(sender, &Message::text(addresses::ECHO, "pong")).map_err(err)?;
            Ok(())
        }))
        .oracle(all_of(vec![
            messages_are(&["ping", "pong"]),
            Box::new(|world: &World| {
                if world.pending_tokens() == 0 {
                    Ok(())
                } else {
                    Err("auto-settled messages handed out tokens".into())
                }
            }),
        ]))
        .run()
        .unwrap();
}

#[test]
fn credit_paces_deferred_deliveries() {
    Scenario::new("five messages")
        .seed(5)
        .script(Box::new(|world| world.open()))
        .script(Box::new(|world| deferred_receiver(world, addresses::FIVE_MESSAGES, 4)))
        .script(Box::new(|world| {
            if world.pending_tokens() != 4 {
                return Err(format!("expected 4 tokens, got {}", world.pending_tokens()));
            }
            while let Some(token) = world.take_token() {
                world.client_mut().settle(token, Outcome::Accepted).map_err(err)?;
            }
            Ok(())
        }))
        .script(Box::new(|world| {
            if world.message_bodies().len() != 4 {
                return Err("settling alone released another message".into());
            }
            let link = world
                .observed()
                .iter()
                .find_map(|observed| match observed {
                    Observed::Message { link, .. } => Some(*link),
                    Observed::Event(_) => None,
                })
                .ok_or("no message seen")?;
            world.client_mut().flow(link, 1).map_err(err)
        }))
        .oracle(messages_are(&["1", "2", "3", "4", "5"]))
        .run()
        .unwrap();
}

#[test]
fn remote_disconnect_ends_the_scenario() {
    Scenario::new("remote disconnect")
        .server(MockServerConfig { receiver_credit: 1, ..MockServerConfig::default() })
        .script(Box::new(|world| world.open()))
        .script(Box::new(|world| {
            let client = world.client_mut();
            let sender = client.create_sender(None).map_err(err)?;
            client.open_link(sender).map_err(err)?;
            client.send(sender, &Message::text(addresses::COMMAND, "disconnect")).map_err(err)?;
            Ok(())
        }))
        .oracle(all_of(vec![disconnected_once(), messages_are(&[])]))
        .run()
        .unwrap();
}

#[test]
fn failing_oracle_is_reported() {
    let result = Scenario::new("wrong container")
        .script(Box::new(|world| world.open()))
        .oracle(remote_container_is("someone else"))
        .run();

    let message = result.unwrap_err();
    assert!(message.starts_with("Scenario 'wrong container': oracle failed:"), "{message}");
}
