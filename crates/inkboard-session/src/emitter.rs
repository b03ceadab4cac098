//! Ordered observer lists with explicit unsubscribe tokens.

use std::fmt;

/// Token returned by [`Emitter::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Listener<T> = Box<dyn FnMut(&T) + Send>;

/// Delivers events to listeners in registration order
pub struct Emitter<T> {
    listeners: Vec<(Subscription, Listener<T>)>,
    next_id: u64,
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&T) + Send + 'static) -> Subscription {
        let token = Subscription(self.next_id);
        self.next_id += 1;
        self.listeners.push((token, Box::new(listener)));
        token
    }

    /// Returns false if the token was not registered here
    pub fn unsubscribe(&mut self, token: Subscription) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != token);
        before != self.listeners.len()
    }

    /// Call every listener with `event`
    pub fn emit(&mut self, event: &T) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }

}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
