#![forbid(unsafe_code)]

//! Declarative fragment manager.
//!
//! Callers describe *what* should be on screen (`add`/`show`/`hide`/`remove`
//! plus a push/pop stack of snapshots); the manager works out *how* to get
//! there on the next render pass, one [`LifecycleTarget`] per mounted
//! fragment.
//!
//! # Reconciliation
//!
//! Every [`FragmentManager::render`] call first reconciles:
//!
//! 1. A pending edit equal to the committed configuration (same fragments,
//!    same targets, same `extra`) is discarded.
//! 2. Without a pending edit, an animating manager whose mounted fragments
//!    have all finished settles them (`Visible`/`Hidden`, or disposal for
//!    fragments no longer configured) and goes idle.
//! 3. With a pending edit, each mounted fragment's next state is read off
//!    the committed × pending table below, fragments that only exist in the
//!    pending edit are mounted fresh, and the edit is committed.
//!
//! | pending \ committed | absent   | visible         | hidden    |
//! |---------------------|----------|-----------------|-----------|
//! | absent              | dispose  | hiding          | hidden    |
//! | visible             | *error*  | visible-freeze  | showing   |
//! | hidden              | *error*  | hiding          | hidden    |
//!
//! The error rows leave the manager untouched and return
//! [`Error::ContractViolation`].
//!
//! Then every place is updated: places the host did not mark this pass but
//! that still hold mounted fragments are updated off-tree first, then the
//! marked places in marking order.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use stagehand_core::metrics;
use stagehand_core::{
    Emitter, Error, FragmentId, HostHook, InsertionPoint, PlacePart, Result, Scheduler,
    StagePolicy, Subscription,
};
use tracing::{debug, debug_span, warn};

use crate::fragment::{Fragment, FragmentState, LifecycleTarget};

/// Desired visibility of a configured fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Should be shown.
    Visible,
    /// Should be mounted but not shown.
    Hidden,
}

/// Whether the manager is waiting for fragments to finish animating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ManagerPhase {
    /// Mounted fragments are at rest.
    #[default]
    Idle,
    /// A configuration was committed and its transitions may still run.
    Animating,
}

/// Events a manager emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
    /// The manager needs another render pass.
    UpdateRequested,
}

/// Summary of one render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderReport {
    /// Whether a pending edit was committed.
    pub committed: bool,
    /// Places the template marked.
    pub places: usize,
    /// Places updated off-tree because the template did not mark them.
    pub offtree_places: usize,
    /// Fragments disposed during the pass.
    pub disposed: usize,
    /// Phase after the pass.
    pub phase: ManagerPhase,
}

/// Collects the places a render template marks.
pub struct PlaceMarker {
    marked: Vec<(String, Rc<dyn PlacePart>)>,
}

impl PlaceMarker {
    /// Mark `place_id` as rendered through `part` this pass.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicatePlace`] if `place_id` was already marked.
    pub fn place(&mut self, place_id: impl Into<String>, part: Rc<dyn PlacePart>) -> Result<()> {
        let place_id = place_id.into();
        if self.marked.iter().any(|(id, _)| *id == place_id) {
            return Err(Error::DuplicatePlace(place_id));
        }
        self.marked.push((place_id, part));
        Ok(())
    }

    /// Number of places marked so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.marked.len()
    }

    /// Whether nothing was marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }
}

impl fmt::Debug for PlaceMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.marked.iter().map(|(id, _)| id))
            .finish()
    }
}

#[derive(Clone)]
struct Placement {
    fragment: Fragment,
    place_id: String,
    target: Target,
}

#[derive(Clone, Default)]
struct ConfigSnapshot {
    fragments: BTreeMap<FragmentId, Placement>,
    extra: Option<Rc<dyn Any>>,
}

impl ConfigSnapshot {
    fn same_as(&self, other: &Self) -> bool {
        let same_extra = match (&self.extra, &other.extra) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
        same_extra
            && self.fragments.len() == other.fragments.len()
            && self.fragments.iter().all(|(id, p)| {
                other
                    .fragments
                    .get(id)
                    .is_some_and(|o| o.target == p.target)
            })
    }

    /// Drop placements whose fragment was disposed.
    fn prune_disposed(&mut self) {
        self.fragments.retain(|id, p| {
            let alive = p.fragment.state() != FragmentState::Disposed;
            if !alive {
                warn!(target: "stagehand.manager", fragment = %id, "dropping disposed fragment from configuration");
            }
            alive
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Planned {
    Keep,
    Dispose,
    Enter(LifecycleTarget),
}

struct Mounted {
    fragment: Fragment,
    place_id: String,
    planned: Planned,
    newly_added: bool,
    listener: Option<Subscription>,
}

#[derive(Default)]
struct ManagerState {
    committed: ConfigSnapshot,
    pending: Option<ConfigSnapshot>,
    stack: Vec<ConfigSnapshot>,
    phase: ManagerPhase,
    mounted: BTreeMap<FragmentId, Mounted>,
}

impl ManagerState {
    fn pending_mut(&mut self) -> &mut ConfigSnapshot {
        let committed = &self.committed;
        self.pending.get_or_insert_with(|| committed.clone())
    }

    fn desired(&self) -> &ConfigSnapshot {
        self.pending.as_ref().unwrap_or(&self.committed)
    }

    fn all_mounted_finished(&self) -> bool {
        self.mounted
            .values()
            .all(|m| m.fragment.animation_finished())
    }
}

struct ManagerInner {
    state: RefCell<ManagerState>,
    scheduler: Scheduler,
    events: Emitter<ManagerEvent>,
    host: RefCell<Option<HostHook>>,
    policy: StagePolicy,
}

/// Reconciles a declarative show/hide configuration against the mounted
/// fragments. Clones share the same manager.
#[derive(Clone)]
pub struct FragmentManager {
    inner: Rc<ManagerInner>,
}

impl fmt::Debug for FragmentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("FragmentManager");
        if let Ok(state) = self.inner.state.try_borrow() {
            s.field("phase", &state.phase)
                .field("committed", &state.committed.fragments.len())
                .field("pending", &state.pending.is_some())
                .field("mounted", &state.mounted.len())
                .field("stack", &state.stack.len());
        }
        s.finish()
    }
}

impl FragmentManager {
    /// Create an idle manager with the default policy.
    pub fn new(scheduler: &Scheduler) -> Self {
        Self::with_policy(scheduler, StagePolicy::default())
    }

    /// Create an idle manager.
    pub fn with_policy(scheduler: &Scheduler, policy: StagePolicy) -> Self {
        Self {
            inner: Rc::new(ManagerInner {
                state: RefCell::new(ManagerState::default()),
                scheduler: scheduler.clone(),
                events: Emitter::new(),
                host: RefCell::new(None),
                policy,
            }),
        }
    }

    /// Builder form of [`set_host`](Self::set_host).
    #[must_use]
    pub fn with_host(self, host: HostHook) -> Self {
        self.set_host(host);
        self
    }

    /// Install the hook called whenever the manager wants a render pass.
    pub fn set_host(&self, host: HostHook) {
        *self.inner.host.borrow_mut() = Some(host);
    }

    /// Policy this manager was built with.
    #[must_use]
    pub fn policy(&self) -> &StagePolicy {
        &self.inner.policy
    }

    /// Listen for [`ManagerEvent`]s.
    pub fn subscribe(&self, callback: impl Fn(&ManagerEvent) + 'static) -> Subscription {
        self.inner.events.subscribe(callback)
    }

    /// Configure `fragment` in `place_id`, initially hidden.
    ///
    /// # Errors
    ///
    /// - [`Error::ContractViolation`] if the fragment was disposed.
    /// - [`Error::AlreadyAdded`] if the fragment is in the committed or the
    ///   pending configuration.
    pub fn add_fragment(&self, fragment: &Fragment, place_id: impl Into<String>) -> Result<()> {
        let id = fragment.id();
        if fragment.state() == FragmentState::Disposed {
            return Err(Error::ContractViolation {
                op: "add",
                fragment: id,
                reason: "fragment is disposed",
            });
        }
        {
            let mut state = self.inner.state.borrow_mut();
            let known = state.committed.fragments.contains_key(&id)
                || state
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.fragments.contains_key(&id));
            if known {
                return Err(Error::AlreadyAdded(id));
            }
            let place_id = place_id.into();
            debug!(target: "stagehand.manager", fragment = %id, place = %place_id, "fragment added");
            state.pending_mut().fragments.insert(
                id,
                Placement {
                    fragment: fragment.clone(),
                    place_id,
                    target: Target::Hidden,
                },
            );
        }
        self.request_update();
        Ok(())
    }

    /// [`add_fragment`](Self::add_fragment) into the policy's default place.
    pub fn add_fragment_default(&self, fragment: &Fragment) -> Result<()> {
        let place = self.inner.policy.default_place.clone();
        self.add_fragment(fragment, place)
    }

    /// Set the fragment's target to visible.
    ///
    /// # Errors
    ///
    /// [`Error::ContractViolation`] if the fragment was never added.
    pub fn show_fragment(&self, fragment: &Fragment) -> Result<()> {
        self.retarget("show", fragment, Target::Visible)
    }

    /// Set the fragment's target to hidden.
    ///
    /// # Errors
    ///
    /// [`Error::ContractViolation`] if the fragment was never added.
    pub fn hide_fragment(&self, fragment: &Fragment) -> Result<()> {
        self.retarget("hide", fragment, Target::Hidden)
    }

    fn retarget(&self, op: &'static str, fragment: &Fragment, target: Target) -> Result<()> {
        let id = fragment.id();
        {
            let mut state = self.inner.state.borrow_mut();
            let current = state
                .pending
                .as_ref()
                .and_then(|p| p.fragments.get(&id))
                .or_else(|| state.committed.fragments.get(&id))
                .cloned();
            let Some(mut placement) = current else {
                return Err(Error::ContractViolation {
                    op,
                    fragment: id,
                    reason: "fragment was never added",
                });
            };
            if placement.target == target {
                return Ok(());
            }
            placement.target = target;
            state.pending_mut().fragments.insert(id, placement);
        }
        self.request_update();
        Ok(())
    }

    /// Drop the fragment from the configuration. It is disposed once it has
    /// finished leaving. Returns `false` if it was not configured.
    pub fn remove_fragment(&self, fragment: &Fragment) -> bool {
        let id = fragment.id();
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.desired().fragments.contains_key(&id) {
                return false;
            }
            state.pending_mut().fragments.remove(&id);
        }
        self.request_update();
        true
    }

    /// Replace the opaque payload carried with the configuration.
    pub fn set_extra(&self, extra: Option<Rc<dyn Any>>) {
        self.inner.state.borrow_mut().pending_mut().extra = extra;
        self.request_update();
    }

    /// Payload of the desired configuration.
    #[must_use]
    pub fn extra(&self) -> Option<Rc<dyn Any>> {
        self.inner.state.borrow().desired().extra.clone()
    }

    /// Save the committed configuration.
    pub fn push_config_to_stack(&self) {
        let mut state = self.inner.state.borrow_mut();
        let snapshot = state.committed.clone();
        state.stack.push(snapshot);
        let cap = self.inner.policy.max_stack_depth.max(1);
        if state.stack.len() > cap {
            let excess = state.stack.len() - cap;
            state.stack.drain(..excess);
            warn!(
                target: "stagehand.manager",
                cap,
                "config stack over capacity; dropped oldest snapshot"
            );
        }
    }

    /// Make the most recently pushed configuration the pending edit.
    /// Returns `false` (and does nothing) if the stack is empty.
    ///
    /// Fragments disposed since the push are left out of the restored
    /// configuration.
    pub fn pop_config_from_stack(&self) -> bool {
        {
            let mut state = self.inner.state.borrow_mut();
            let Some(mut snapshot) = state.stack.pop() else {
                return false;
            };
            snapshot.prune_disposed();
            state.pending = Some(snapshot);
        }
        self.request_update();
        true
    }

    /// Ask the host for a render pass on the next microtask.
    pub fn request_update(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.scheduler.defer(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let host = inner.host.borrow().clone();
            if let Some(host) = host {
                host();
            }
            inner.events.emit(&ManagerEvent::UpdateRequested);
        });
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ManagerPhase {
        self.inner.state.borrow().phase
    }

    /// Whether an edit is waiting for the next render pass.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.inner.state.borrow().pending.is_some()
    }

    /// Whether `id` currently has a mounted entry.
    #[must_use]
    pub fn is_mounted(&self, id: FragmentId) -> bool {
        self.inner.state.borrow().mounted.contains_key(&id)
    }

    /// Number of mounted fragments.
    #[must_use]
    pub fn mounted_count(&self) -> usize {
        self.inner.state.borrow().mounted.len()
    }

    /// Number of saved configurations.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.inner.state.borrow().stack.len()
    }

    /// Desired target of `id`, pending edit first.
    #[must_use]
    pub fn target_of(&self, id: FragmentId) -> Option<Target> {
        self.inner
            .state
            .borrow()
            .desired()
            .fragments
            .get(&id)
            .map(|p| p.target)
    }

    /// Run one render pass.
    ///
    /// `template` marks the places the host renders this pass. Nothing is
    /// reconciled until the template returns successfully.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicatePlace`] from the template.
    /// - [`Error::ContractViolation`] when a pending edit shows or hides a
    ///   mounted fragment that was never committed.
    /// - [`Error::Reentrancy`] when a fragment is already mid-update; the
    ///   rest of the pass still runs.
    pub fn render(
        &self,
        template: impl FnOnce(&mut PlaceMarker) -> Result<()>,
    ) -> Result<RenderReport> {
        let mut marker = PlaceMarker { marked: Vec::new() };
        template(&mut marker)?;

        let committed = self.reconcile()?;

        let offtree: Vec<String> = {
            let state = self.inner.state.borrow();
            let mut ids: Vec<String> = Vec::new();
            for mounted in state.mounted.values() {
                let marked = marker.marked.iter().any(|(id, _)| *id == mounted.place_id);
                if !marked && !ids.contains(&mounted.place_id) {
                    ids.push(mounted.place_id.clone());
                }
            }
            ids
        };

        let mut disposed = 0;
        let mut first_error = None;
        for place_id in &offtree {
            let (n, err) = self.update_place(place_id, None);
            disposed += n;
            first_error = first_error.or(err);
        }
        for (place_id, part) in &marker.marked {
            let (n, err) = self.update_place(place_id, Some(part.as_ref()));
            disposed += n;
            first_error = first_error.or(err);
        }

        let (phase, settled) = {
            let state = self.inner.state.borrow();
            (state.phase, state.all_mounted_finished())
        };
        if phase == ManagerPhase::Animating && settled {
            self.request_update();
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        Ok(RenderReport {
            committed,
            places: marker.marked.len(),
            offtree_places: offtree.len(),
            disposed,
            phase,
        })
    }

    /// Returns whether a pending edit was committed.
    fn reconcile(&self) -> Result<bool> {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let span = debug_span!(
            "manager.reconcile",
            committed = state.committed.fragments.len(),
            mounted = state.mounted.len(),
            outcome = tracing::field::Empty
        );
        let _enter = span.enter();

        if let Some(pending) = state.pending.as_mut() {
            pending.prune_disposed();
        }
        if state
            .pending
            .as_ref()
            .is_some_and(|p| p.same_as(&state.committed))
        {
            state.pending = None;
        }

        let Some(pending) = state.pending.take() else {
            if state.phase == ManagerPhase::Animating && state.all_mounted_finished() {
                for (id, mounted) in &mut state.mounted {
                    mounted.planned = match state.committed.fragments.get(id) {
                        None => Planned::Dispose,
                        Some(p) if p.target == Target::Visible => {
                            Planned::Enter(LifecycleTarget::Visible)
                        }
                        Some(_) => Planned::Enter(LifecycleTarget::Hidden),
                    };
                }
                state.phase = ManagerPhase::Idle;
                span.record("outcome", "settled");
            } else {
                span.record("outcome", "unchanged");
            }
            return Ok(false);
        };

        let mut plans = Vec::with_capacity(state.mounted.len());
        for id in state.mounted.keys() {
            let committed = state.committed.fragments.get(id).map(|p| p.target);
            let wanted = pending.fragments.get(id).map(|p| p.target);
            let plan = match (wanted, committed) {
                (None, None) => Planned::Dispose,
                (None, Some(Target::Visible)) => Planned::Enter(LifecycleTarget::Hiding),
                (None, Some(Target::Hidden)) => Planned::Enter(LifecycleTarget::Hidden),
                (Some(Target::Visible), Some(Target::Visible)) => {
                    Planned::Enter(LifecycleTarget::VisibleFreeze)
                }
                (Some(Target::Visible), Some(Target::Hidden)) => {
                    Planned::Enter(LifecycleTarget::Showing)
                }
                (Some(Target::Hidden), Some(Target::Visible)) => {
                    Planned::Enter(LifecycleTarget::Hiding)
                }
                (Some(Target::Hidden), Some(Target::Hidden)) => {
                    Planned::Enter(LifecycleTarget::Hidden)
                }
                (Some(target), None) => {
                    let op = if target == Target::Visible { "show" } else { "hide" };
                    warn!(target: "stagehand.manager", fragment = %id, op, "edit targets an uncommitted fragment");
                    let fragment = *id;
                    state.pending = Some(pending);
                    span.record("outcome", "rejected");
                    return Err(Error::ContractViolation {
                        op,
                        fragment,
                        reason: "fragment is mounted but absent from the committed configuration",
                    });
                }
            };
            plans.push((*id, plan));
        }

        for (id, plan) in plans {
            if let Some(mounted) = state.mounted.get_mut(&id) {
                mounted.planned = plan;
            }
        }
        for (id, placement) in &pending.fragments {
            state.mounted.entry(*id).or_insert_with(|| Mounted {
                fragment: placement.fragment.clone(),
                place_id: placement.place_id.clone(),
                planned: Planned::Enter(match placement.target {
                    Target::Visible => LifecycleTarget::Showing,
                    Target::Hidden => LifecycleTarget::Hidden,
                }),
                newly_added: true,
                listener: None,
            });
        }

        state.phase = if state.mounted.is_empty() {
            ManagerPhase::Idle
        } else {
            ManagerPhase::Animating
        };
        state.committed = pending;
        metrics::record_reconciliation();
        span.record("outcome", "committed");
        Ok(true)
    }

    /// Returns the number of fragments disposed and the first update error.
    fn update_place(&self, place_id: &str, part: Option<&dyn PlacePart>) -> (usize, Option<Error>) {
        let mut doomed = Vec::new();
        let mut members = Vec::new();
        {
            let mut state = self.inner.state.borrow_mut();
            let ids: Vec<FragmentId> = state
                .mounted
                .iter()
                .filter(|(_, m)| m.place_id == place_id)
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                let Some(mounted) = state.mounted.get_mut(&id) else {
                    continue;
                };
                if mounted.planned == Planned::Dispose {
                    if let Some(mounted) = state.mounted.remove(&id) {
                        doomed.push(mounted);
                    }
                    continue;
                }
                if mounted.newly_added {
                    mounted.newly_added = false;
                    mounted.listener = Some(self.finish_listener(&mounted.fragment));
                }
                let next = match std::mem::replace(&mut mounted.planned, Planned::Keep) {
                    Planned::Enter(target) => Some(target),
                    Planned::Keep | Planned::Dispose => None,
                };
                members.push((mounted.fragment.clone(), next));
            }
        }

        let mut disposed = 0;
        for Mounted {
            fragment, listener, ..
        } in doomed
        {
            drop(listener);
            if fragment.state() == FragmentState::Disposed {
                continue;
            }
            disposed += 1;
            fragment.dispose();
            metrics::record_fragment_disposed();
            debug!(target: "stagehand.manager", fragment = %fragment.id(), place = place_id, "fragment disposed");
        }

        let points: Vec<Option<Rc<dyn InsertionPoint>>> = match part {
            Some(part) => {
                let keys: Vec<FragmentId> = members.iter().map(|(f, _)| f.id()).collect();
                part.keyed_list(&keys).into_iter().map(Some).collect()
            }
            None => vec![None; members.len()],
        };
        if points.len() != members.len() {
            warn!(
                target: "stagehand.manager",
                place = place_id,
                expected = members.len(),
                got = points.len(),
                "keyed list size mismatch"
            );
        }

        let mut first_error = None;
        for ((fragment, next), point) in members.into_iter().zip(points) {
            if let Err(err) = fragment.update_by_fragment_manager(point, next) {
                warn!(target: "stagehand.manager", fragment = %fragment.id(), error = %err, "fragment update refused");
                first_error.get_or_insert(err);
            }
        }
        (disposed, first_error)
    }

    fn finish_listener(&self, fragment: &Fragment) -> Subscription {
        let weak: Weak<ManagerInner> = Rc::downgrade(&self.inner);
        fragment.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                FragmentManager { inner }.request_update();
            }
        })
    }
}
