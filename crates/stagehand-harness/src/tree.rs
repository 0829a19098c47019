#![forbid(unsafe_code)]

//! In-memory render tree.
//!
//! [`MemoryPlace`] keeps one [`MemoryPoint`] per fragment key for as long as
//! the key stays listed, so insertion point identity behaves like a real
//! keyed list. Slots record every committed content value.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use stagehand_core::{Content, FragmentId, InsertionPoint, NodeId, PlacePart, RenderSlot};

/// A fragment's slot. Remembers every committed content value.
#[derive(Debug)]
pub struct MemorySlot {
    id: NodeId,
    staged: RefCell<Option<Content>>,
    committed: RefCell<Vec<Option<Content>>>,
}

impl MemorySlot {
    fn new() -> Self {
        Self {
            id: NodeId::next(),
            staged: RefCell::new(None),
            committed: RefCell::new(Vec::new()),
        }
    }

    /// Number of commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.committed.borrow().len()
    }

    /// Most recently committed content.
    #[must_use]
    pub fn last_committed(&self) -> Option<Content> {
        self.committed.borrow().last().cloned().flatten()
    }
}

impl RenderSlot for MemorySlot {
    fn id(&self) -> NodeId {
        self.id
    }

    fn set_content(&self, content: Option<Content>) {
        *self.staged.borrow_mut() = content;
    }

    fn commit(&self) {
        let content = self.staged.borrow().clone();
        self.committed.borrow_mut().push(content);
    }
}

/// Position of one fragment inside a [`MemoryPlace`].
#[derive(Debug)]
pub struct MemoryPoint {
    id: NodeId,
    key: FragmentId,
    slot: RefCell<Option<Rc<MemorySlot>>>,
    attached: Cell<usize>,
}

impl MemoryPoint {
    fn new(key: FragmentId) -> Self {
        Self {
            id: NodeId::next(),
            key,
            slot: RefCell::new(None),
            attached: Cell::new(0),
        }
    }

    /// Fragment this point belongs to.
    #[must_use]
    pub fn key(&self) -> FragmentId {
        self.key
    }

    /// The slot currently attached, if any.
    #[must_use]
    pub fn slot(&self) -> Option<Rc<MemorySlot>> {
        self.slot.borrow().clone()
    }

    /// How many slots were ever attached here.
    #[must_use]
    pub fn attach_count(&self) -> usize {
        self.attached.get()
    }

    /// Remove the attached slot, as if the host had wiped the subtree.
    pub fn clear(&self) {
        self.slot.borrow_mut().take();
    }
}

impl InsertionPoint for MemoryPoint {
    fn id(&self) -> NodeId {
        self.id
    }

    fn attach_slot(&self) -> Rc<dyn RenderSlot> {
        let slot = Rc::new(MemorySlot::new());
        *self.slot.borrow_mut() = Some(Rc::clone(&slot));
        self.attached.set(self.attached.get() + 1);
        slot
    }

    fn holds(&self, slot: &dyn RenderSlot) -> bool {
        self.slot
            .borrow()
            .as_ref()
            .is_some_and(|held| held.id == slot.id())
    }
}

/// Keyed-list place. Points survive while their key stays listed.
#[derive(Debug, Default)]
pub struct MemoryPlace {
    points: RefCell<BTreeMap<FragmentId, Rc<MemoryPoint>>>,
    order: RefCell<Vec<FragmentId>>,
    renders: Cell<usize>,
}

impl MemoryPlace {
    /// An empty place.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Point currently rendered for `key`.
    #[must_use]
    pub fn point(&self, key: FragmentId) -> Option<Rc<MemoryPoint>> {
        self.points.borrow().get(&key).cloned()
    }

    /// Keys in render order, as of the last pass.
    #[must_use]
    pub fn keys(&self) -> Vec<FragmentId> {
        self.order.borrow().clone()
    }

    /// Number of keyed-list renders.
    #[must_use]
    pub fn render_count(&self) -> usize {
        self.renders.get()
    }

    /// Drop every point, as if the place had been unmounted and remounted.
    pub fn remount(&self) {
        self.points.borrow_mut().clear();
        self.order.borrow_mut().clear();
    }
}

impl PlacePart for MemoryPlace {
    fn keyed_list(&self, keys: &[FragmentId]) -> Vec<Rc<dyn InsertionPoint>> {
        self.renders.set(self.renders.get() + 1);
        let mut points = self.points.borrow_mut();
        points.retain(|key, _| keys.contains(key));
        *self.order.borrow_mut() = keys.to_vec();
        keys.iter()
            .map(|key| {
                let point = points
                    .entry(*key)
                    .or_insert_with(|| Rc::new(MemoryPoint::new(*key)));
                Rc::clone(point) as Rc<dyn InsertionPoint>
            })
            .collect()
    }
}
