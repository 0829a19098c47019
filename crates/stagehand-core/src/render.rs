#![forbid(unsafe_code)]

//! Render-tree collaborator traits.
//!
//! Stagehand does not render anything itself. A host render tree provides
//! three primitives:
//!
//! - [`PlacePart`]: where a named place lands in the tree; renders a
//!   stable-identity keyed list of fragments.
//! - [`InsertionPoint`]: the per-fragment position inside that list.
//! - [`RenderSlot`]: the fragment's own slot, appended into an insertion
//!   point, receiving the fragment's [`Content`].
//!
//! Identity is by [`NodeId`]: the scheduler treats a different insertion
//! point id as a re-parent.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::ids::{FragmentId, NodeId};

/// Opaque render output. The host decides what it holds.
#[derive(Clone)]
pub struct Content(Rc<dyn Any>);

impl Content {
    /// Wrap a host value.
    #[must_use]
    pub fn new<T: 'static>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Borrow the host value if it has type `T`.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether the host value has type `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content").finish_non_exhaustive()
    }
}

/// A fragment's render slot.
pub trait RenderSlot {
    /// Identity of this slot.
    fn id(&self) -> NodeId;

    /// Replace the slot's pending content (`None` renders nothing).
    fn set_content(&self, content: Option<Content>);

    /// Make the pending content visible.
    fn commit(&self);
}

/// Per-fragment position inside a place's keyed list.
pub trait InsertionPoint {
    /// Identity of this insertion point.
    fn id(&self) -> NodeId;

    /// Create a fresh slot appended directly into this insertion point.
    fn attach_slot(&self) -> Rc<dyn RenderSlot>;

    /// Whether `slot` is still attached directly to this insertion point.
    fn holds(&self, slot: &dyn RenderSlot) -> bool;
}

/// Where a place renders in the host tree.
pub trait PlacePart {
    /// Reconcile the keyed child list to exactly `keys`, in order.
    ///
    /// Returns one insertion point per key. Keys present in the previous call
    /// keep their insertion point (same [`NodeId`]); keys no longer listed
    /// are dropped from the tree.
    fn keyed_list(&self, keys: &[FragmentId]) -> Vec<Rc<dyn InsertionPoint>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_downcasts_to_host_type() {
        let content = Content::new(String::from("page"));
        assert!(content.is::<String>());
        assert_eq!(content.downcast_ref::<String>().map(String::as_str), Some("page"));
        assert!(content.downcast_ref::<u32>().is_none());
    }
}
