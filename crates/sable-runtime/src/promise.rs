//! Promise handles.
//!
//! A promise is a settled-or-pending cell plus a reaction list. Settling
//! never runs user code synchronously: reactions are enqueued on the VM's
//! microtask queue, preserving the ordering convention that a `then`
//! continuation scheduled during the current task runs before any
//! subsequent task.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::value::Value;

/// Promise state
#[derive(Debug, Clone)]
pub enum PromiseState {
    /// Not yet settled
    Pending,
    /// Resolved with a value
    Fulfilled(Value),
    /// Rejected with a reason
    Rejected(Value),
}

/// One half of a reaction: what to run when the promise settles this way
pub enum ReactionHandler {
    /// Pass the value (or reason) through to the derived promise
    PassThrough,
    /// Call a user function with the settlement value
    Call(Value),
    /// Run a native continuation (async machine steps, combinators)
    Native(Box<dyn FnOnce(&mut crate::vm::Vm, Value)>),
}

/// A registered `then`/`catch` reaction
pub struct Reaction {
    /// Runs on fulfillment
    pub on_fulfilled: ReactionHandler,
    /// Runs on rejection
    pub on_rejected: ReactionHandler,
    /// The promise derived from the `then` call (`None` for native
    /// continuations, which manage their own downstream state)
    pub derived: Option<Rc<PromiseData>>,
}

/// A promise handle
pub struct PromiseData {
    /// Current state
    pub state: RefCell<PromiseState>,
    /// Reactions waiting on settlement
    pub reactions: RefCell<Vec<Reaction>>,
    /// Whether any rejection handler was ever attached
    pub handled: Cell<bool>,
}

impl std::fmt::Debug for PromiseData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.state.borrow() {
            PromiseState::Pending => write!(f, "Promise {{ <pending> }}"),
            PromiseState::Fulfilled(v) => write!(f, "Promise {{ {v:?} }}"),
            PromiseState::Rejected(v) => write!(f, "Promise {{ <rejected> {v:?} }}"),
        }
    }
}

impl PromiseData {
    /// Create a pending promise
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(PromiseState::Pending),
            reactions: RefCell::new(Vec::new()),
            handled: Cell::new(false),
        })
    }

    /// Create an already fulfilled promise
    pub fn fulfilled(value: Value) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(PromiseState::Fulfilled(value)),
            reactions: RefCell::new(Vec::new()),
            handled: Cell::new(false),
        })
    }

    /// Create an already rejected promise
    pub fn rejected(reason: Value) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(PromiseState::Rejected(reason)),
            reactions: RefCell::new(Vec::new()),
            handled: Cell::new(false),
        })
    }

    /// Snapshot the current state
    pub fn snapshot(&self) -> PromiseState {
        self.state.borrow().clone()
    }

    /// Whether the promise is still pending
    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), PromiseState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_constructors() {
        let f = PromiseData::fulfilled(Value::Number(1.0));
        assert!(matches!(f.snapshot(), PromiseState::Fulfilled(_)));
        assert!(!f.is_pending());

        let p = PromiseData::new();
        assert!(p.is_pending());
    }
}
