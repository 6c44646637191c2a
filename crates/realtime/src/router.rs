//! Tag-based dispatch of inbound frames.
//!
//! A [`FrameRouter`] maps [`FrameKind`]s to handlers that mutate some
//! target (a store, a counter, a test probe). The notification and
//! conversation channels register different kinds on the same mechanism.
//! Unknown and unregistered kinds are no-ops.

use std::collections::HashMap;

use crate::frames::{Frame, FrameKind};

/// A frame handler operating on a target of type `T`.
pub type Handler<T> = Box<dyn Fn(&mut T, &Frame) + Send + Sync>;

pub struct FrameRouter<T> {
    handlers: HashMap<FrameKind, Handler<T>>,
}

impl<T> FrameRouter<T> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `kind`, replacing any earlier registration.
    pub fn on<F>(mut self, kind: FrameKind, handler: F) -> Self
    where
        F: Fn(&mut T, &Frame) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
        self
    }

    /// Route `frame` to its handler. Returns whether a handler ran.
    pub fn dispatch(&self, target: &mut T, frame: &Frame) -> bool {
        match self.handlers.get(&frame.kind()) {
            Some(handler) => {
                handler(target, frame);
                true
            }
            None => {
                tracing::trace!(kind = ?frame.kind(), "No handler registered for frame");
                false
            }
        }
    }
}

impl<T> Default for FrameRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}
