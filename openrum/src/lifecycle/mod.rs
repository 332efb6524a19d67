//! The composite object tree: Session → RootAction → Action → WebRequestTracer.
//!
//! Every node owns its direct children and a lock guarding the child list
//! plus its own closed state. Parents are reached through non-owning back
//! references; closing a child only ever touches the direct parent's lock,
//! never a grandparent's, so the tree closes without lock recursion.
//!
//! The public handle types ([`Session`], [`RootAction`], [`Action`],
//! [`WebRequestTracer`]) are null-object sums: invalid input or a closed
//! owner yields a no-op handle on which every operation silently does
//! nothing.

mod action;
mod session;
mod tracer;

pub use self::action::{Action, RootAction};
pub use self::session::Session;
pub use self::tracer::WebRequestTracer;

pub(crate) use self::action::ActionInner;
pub(crate) use self::session::{SessionCreator, SessionInner, SessionProxy};
pub(crate) use self::tracer::TracerInner;

use std::sync::{Arc, Weak};

/// A tagged handle to a child in the composite tree.
///
/// The tag doubles as the capability set: both variants can be canceled,
/// which discards their pending data instead of committing it.
#[derive(Clone)]
pub(crate) enum OpenKitObject {
    Action(Arc<ActionInner>),
    Tracer(Arc<TracerInner>),
}

impl std::fmt::Debug for OpenKitObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenKitObject::Action(action) => f.debug_tuple("Action").field(&action.id()).finish(),
            OpenKitObject::Tracer(_) => f.write_str("Tracer"),
        }
    }
}

impl OpenKitObject {
    /// Closes the child, committing its data.
    pub fn close(&self) {
        match self {
            OpenKitObject::Action(action) => {
                action.leave();
            }
            OpenKitObject::Tracer(tracer) => tracer.stop(None),
        }
    }

    /// Cancels the child, discarding its pending data.
    pub fn cancel(&self) {
        match self {
            OpenKitObject::Action(action) => {
                action.cancel();
            }
            OpenKitObject::Tracer(tracer) => tracer.cancel(),
        }
    }

    /// Identity comparison for child-list bookkeeping.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OpenKitObject::Action(a), OpenKitObject::Action(b)) => Arc::ptr_eq(a, b),
            (OpenKitObject::Tracer(a), OpenKitObject::Tracer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// The node operations shared by every composite parent.
pub(crate) trait Composite: Send + Sync {
    /// The action id children record as their parent, 0 for sessions.
    fn action_id(&self) -> i32;

    /// Adds a child under this node.
    fn store_child(&self, child: OpenKitObject);

    /// Removes a child from this node without closing it.
    fn remove_child(&self, child: &OpenKitObject);

    /// Snapshot of the current children.
    fn copy_of_children(&self) -> Vec<OpenKitObject>;

    /// Called by a child once it has closed itself.
    fn on_child_closed(&self, child: &OpenKitObject) {
        self.remove_child(child);
    }
}

/// Non-owning back reference from a child to its parent node.
#[derive(Clone)]
pub(crate) enum ParentLink {
    Session(Weak<SessionInner>),
    Action(Weak<ActionInner>),
}

impl ParentLink {
    /// The parent's action id, or 0 when the parent is a session or gone.
    pub fn action_id(&self) -> i32 {
        match self {
            ParentLink::Session(_) => 0,
            ParentLink::Action(action) => {
                action.upgrade().map_or(0, |action| action.action_id())
            }
        }
    }

    /// Notifies the parent that the given child closed.
    pub fn on_child_closed(&self, child: &OpenKitObject) {
        match self {
            ParentLink::Session(session) => {
                if let Some(session) = session.upgrade() {
                    session.on_child_closed(child);
                }
            }
            ParentLink::Action(action) => {
                if let Some(action) = action.upgrade() {
                    action.on_child_closed(child);
                }
            }
        }
    }

    /// The parent action, if the parent is an action that is still alive.
    pub fn parent_action(&self) -> Option<Arc<ActionInner>> {
        match self {
            ParentLink::Session(_) => None,
            ParentLink::Action(action) => action.upgrade(),
        }
    }
}

/// Returns whether the URL is acceptable for web-request tracing.
///
/// Only absolute `http` and `https` URLs are traced.
pub(crate) fn is_valid_http_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}
