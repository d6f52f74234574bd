//! Name to handler registry for inbound calls
//!
//! Handlers run synchronously on the connection's processing path. The
//! returned value becomes the `_result` payload when the peer asked for a
//! reply.

use std::collections::HashMap;
use std::fmt;

use crate::amf::AmfValue;

/// Inbound call handler: receives the call arguments (after the command object)
pub type CallHandler = Box<dyn FnMut(&[AmfValue]) -> AmfValue + Send>;

/// Registered inbound call handlers
#[derive(Default)]
pub struct CallRegistry {
    handlers: HashMap<String, CallHandler>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: FnMut(&[AmfValue]) -> AmfValue + Send + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Run the handler for `name`; `None` if nothing is registered
    pub fn dispatch(&mut self, name: &str, args: &[AmfValue]) -> Option<AmfValue> {
        let handler = self.handlers.get_mut(name)?;
        Some(handler(args))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
