//! # Handler Dispatch
//!
//! A type-indexed observer table: exactly one observer per message type,
//! registered at startup, invoked synchronously on the subscription's
//! delivery task. Observers must return quickly; long work belongs in
//! the mempool or a spawned task, not here.

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::trace;

use crate::codec::{Envelope, MessageType};

/// Observer callback. Receives the validated envelope and the transport
/// peer id it arrived from (empty for locally originated envelopes).
pub type Observer = Box<dyn Fn(&Envelope, &str) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The type already has an observer; registration is once per type.
    #[error("observer already registered for {0}")]
    AlreadyRegistered(MessageType),
}

/// The observer registry. Rarely mutated after startup, read on every
/// delivered message.
#[derive(Default)]
pub struct Dispatcher {
    observers: RwLock<HashMap<MessageType, Observer>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the observer for a message type. Fails if one exists.
    pub fn register<F>(&self, msg_type: MessageType, observer: F) -> Result<(), DispatchError>
    where
        F: Fn(&Envelope, &str) + Send + Sync + 'static,
    {
        let mut observers = self.observers.write();
        if observers.contains_key(&msg_type) {
            return Err(DispatchError::AlreadyRegistered(msg_type));
        }
        observers.insert(msg_type, Box::new(observer));
        Ok(())
    }

    /// Deliver an envelope to its observer. Returns whether one was
    /// registered; an unobserved type is not an error, just dead air.
    pub fn dispatch(&self, envelope: &Envelope, from_peer: &str) -> bool {
        let observers = self.observers.read();
        match observers.get(&envelope.msg_type) {
            Some(observer) => {
                observer(envelope, from_peer);
                true
            }
            None => {
                trace!(target: "gossip", msg_type = %envelope.msg_type, "no observer registered");
                false
            }
        }
    }

    /// Whether a type has an observer.
    pub fn observes(&self, msg_type: MessageType) -> bool {
        self.observers.read().contains_key(&msg_type)
    }
}
