//! Reusable oracle checks.

use linkflow_core::ConnectionEvent;

use crate::scenario::{OracleFn, World};

/// Every check must pass; the first failure is reported.
pub fn all_of(checks: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world: &World| checks.iter().try_for_each(|check| check(world)))
}

/// The client saw exactly these message bodies, in order.
pub fn messages_are(expected: &'static [&'static str]) -> OracleFn {
    Box::new(move |world: &World| {
        let bodies = world.message_bodies();
        if bodies == expected {
            Ok(())
        } else {
            Err(format!("expected messages {expected:?}, got {bodies:?}"))
        }
    })
}

/// The client reported its disconnect exactly once and is disconnected.
pub fn disconnected_once() -> OracleFn {
    Box::new(|world: &World| {
        let seen = world.count(&ConnectionEvent::Disconnected);
        if seen != 1 {
            return Err(format!("expected one disconnect notification, got {seen}"));
        }
        if !world.client().is_disconnected() {
            return Err("client does not report itself disconnected".into());
        }
        Ok(())
    })
}

/// The peer's container id as the client sees it.
pub fn remote_container_is(expected: &'static str) -> OracleFn {
    Box::new(move |world: &World| match world.client().remote_container() {
        Some(actual) if actual == expected => Ok(()),
        other => Err(format!("expected remote container {expected:?}, got {other:?}")),
    })
}
