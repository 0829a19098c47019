#![forbid(unsafe_code)]

//! End-to-end lifecycle scenarios driven through a [`Stage`].
//!
//! Run:
//!   cargo test -p stagehand-harness --test lifecycle_scenarios

use std::rc::Rc;

use stagehand_core::{Error, InsertionPoint, StagePolicy};
use stagehand_harness::{MemoryPlace, RunState, Stage};
use stagehand_runtime::{AnimationKind, Fragment, FragmentState, ManagerPhase, Target};

fn content_of(place: &MemoryPlace, f: &Fragment) -> String {
    place
        .point(f.id())
        .and_then(|p| p.slot())
        .and_then(|s| s.last_committed())
        .and_then(|c| c.downcast_ref::<String>().cloned())
        .unwrap_or_default()
}

#[test]
fn show_then_hide_before_finish_goes_straight_to_hiding() {
    let stage = Stage::new();
    stage.place("main");
    let (f, recorder) = stage.fragment("f");
    let manager = stage.manager();

    manager.add_fragment(&f, "main").unwrap();
    manager.show_fragment(&f).unwrap();
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Showing);
    let show = recorder.runs(AnimationKind::Showing);
    assert_eq!(show.len(), 1);
    assert_eq!(show[0].state(), RunState::Playing);

    manager.hide_fragment(&f).unwrap();
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Hiding);
    assert_eq!(show[0].state(), RunState::Cancelled);
    assert_eq!(show[0].listener_count(), 0);

    recorder.finish_all();
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Hidden);
    assert!(!recorder.rendered(FragmentState::Visible));
    assert!(stage.is_quiet());
}

#[test]
fn hiding_and_showing_together_in_one_place() {
    let stage = Stage::new();
    let place = stage.place("main");
    let (f1, p1) = stage.fragment("one");
    let (f2, p2) = stage.fragment("two");
    let manager = stage.manager();

    manager.add_fragment(&f1, "main").unwrap();
    manager.show_fragment(&f1).unwrap();
    stage.settle().unwrap();
    p1.finish_all();
    stage.settle().unwrap();
    assert_eq!(f1.state(), FragmentState::Visible);

    manager.hide_fragment(&f1).unwrap();
    manager.add_fragment(&f2, "main").unwrap();
    manager.show_fragment(&f2).unwrap();
    stage.settle().unwrap();
    assert_eq!(f1.state(), FragmentState::Hiding);
    assert_eq!(f2.state(), FragmentState::Showing);
    assert_eq!(place.keys(), vec![f1.id(), f2.id()]);
    assert_eq!(manager.phase(), ManagerPhase::Animating);

    // One side finishing is not enough to settle.
    p1.finish_all();
    stage.settle().unwrap();
    assert_eq!(manager.phase(), ManagerPhase::Animating);
    assert_eq!(f2.state(), FragmentState::Showing);

    p2.finish_all();
    stage.settle().unwrap();
    assert_eq!(f1.state(), FragmentState::Hidden);
    assert_eq!(f2.state(), FragmentState::Visible);
    assert_eq!(content_of(&place, &f2), "two:visible");
    assert!(p2.last_interactable());
    assert!(!p1.last_visible());
    assert!(stage.is_quiet());
}

#[test]
fn visible_fragment_freezes_instead_of_restarting() {
    let stage = Stage::new();
    stage.place("main");
    let (f1, p1) = stage.fragment("stay");
    let (f2, p2) = stage.fragment("enter");
    let manager = stage.manager();

    manager.add_fragment(&f1, "main").unwrap();
    manager.show_fragment(&f1).unwrap();
    stage.settle().unwrap();
    p1.finish_all();
    stage.settle().unwrap();
    let renders_before = p1.states().len();

    manager.add_fragment(&f2, "main").unwrap();
    manager.show_fragment(&f2).unwrap();
    stage.settle().unwrap();
    assert_eq!(f1.state(), FragmentState::VisibleFreeze);
    assert!(p1.last_visible());
    assert!(!p1.last_interactable());

    p2.finish_all();
    stage.settle().unwrap();
    assert_eq!(f1.state(), FragmentState::Visible);
    assert_eq!(f2.state(), FragmentState::Visible);

    let after: Vec<FragmentState> = p1.states()[renders_before..].to_vec();
    assert_eq!(
        after,
        vec![FragmentState::VisibleFreeze, FragmentState::Visible]
    );
    assert_eq!(p1.runs(AnimationKind::Showing).len(), 1);
}

#[test]
fn reparent_mid_showing_cancels_and_never_reuses_runs() {
    let stage = Stage::new();
    let place = stage.place("main");
    let (f, recorder) = stage.fragment("moving");
    let manager = stage.manager();

    manager.add_fragment(&f, "main").unwrap();
    manager.show_fragment(&f).unwrap();
    stage.settle().unwrap();
    let first_point = place.point(f.id()).unwrap();
    let show = recorder.runs(AnimationKind::Showing);

    place.remount();
    stage.render().unwrap();
    assert_ne!(place.point(f.id()).unwrap().id(), first_point.id());
    assert_eq!(f.state(), FragmentState::Hidden);
    assert_eq!(show[0].state(), RunState::Cancelled);
    assert_eq!(f.active_run_count(), 0);

    // The cancelled run finishing late must not be observed.
    assert!(!show[0].finish());

    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Visible);
    assert_eq!(recorder.runs(AnimationKind::Showing).len(), 1);
    assert_eq!(show[0].plays(), 1);
}

#[test]
fn unmarked_place_updates_fragments_off_tree() {
    let stage = Stage::new();
    stage.place("side");
    let (f, recorder) = stage.fragment("panel");
    let manager = stage.manager();

    stage.unmark("side");
    manager.add_fragment(&f, "side").unwrap();
    manager.show_fragment(&f).unwrap();
    stage.settle().unwrap();

    assert_eq!(f.state(), FragmentState::Visible);
    assert_eq!(recorder.render_count(), 0, "off-tree fragments never render");
    assert!(recorder.all_runs().is_empty());

    manager.remove_fragment(&f);
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Disposed);
    assert_eq!(stage.disposed_total(), 1);
}

#[test]
fn removed_fragments_are_disposed_exactly_once() {
    let stage = Stage::new();
    stage.place("main");
    let (f, recorder) = stage.fragment("gone");
    let manager = stage.manager();

    manager.add_fragment(&f, "main").unwrap();
    manager.show_fragment(&f).unwrap();
    stage.settle().unwrap();
    recorder.finish_all();
    stage.settle().unwrap();

    assert!(manager.remove_fragment(&f));
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Hiding);
    assert!(manager.is_mounted(f.id()));

    recorder.finish_all();
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Disposed);
    assert!(!manager.is_mounted(f.id()));

    // Further passes do not touch it again.
    manager.request_update();
    stage.settle().unwrap();
    assert_eq!(stage.disposed_total(), 1);
}

#[test]
fn disposed_fragment_stays_out_after_re_add_attempt() {
    let stage = Stage::new();
    stage.place("main");
    let (f, recorder) = stage.fragment("retired");
    recorder.set_instant(true);
    let manager = stage.manager();

    manager.add_fragment(&f, "main").unwrap();
    manager.show_fragment(&f).unwrap();
    stage.settle().unwrap();
    manager.remove_fragment(&f);
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Disposed);

    let err = manager.add_fragment(&f, "main").unwrap_err();
    assert!(matches!(err, Error::ContractViolation { .. }));
    assert!(manager.show_fragment(&f).is_err());
    stage.settle().unwrap();

    assert!(!manager.is_mounted(f.id()));
    assert_eq!(manager.target_of(f.id()), None);
    assert!(!manager.remove_fragment(&f));
    stage.settle().unwrap();
    assert_eq!(stage.disposed_total(), 1);
    assert!(stage.is_quiet());
}

#[test]
fn popped_snapshot_leaves_out_disposed_fragments() {
    let stage = Stage::new();
    stage.place("main");
    let (f, recorder) = stage.fragment("stale");
    recorder.set_instant(true);
    let manager = stage.manager();

    manager.add_fragment(&f, "main").unwrap();
    manager.show_fragment(&f).unwrap();
    stage.settle().unwrap();
    manager.push_config_to_stack();

    manager.remove_fragment(&f);
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Disposed);

    assert!(manager.pop_config_from_stack());
    assert_eq!(manager.target_of(f.id()), None);
    stage.settle().unwrap();

    assert_eq!(f.state(), FragmentState::Disposed);
    assert!(!manager.is_mounted(f.id()));
    assert_eq!(stage.disposed_total(), 1);
    assert!(stage.is_quiet());
}

#[test]
fn request_update_coalesces_into_one_render() {
    let stage = Stage::new();
    stage.place("main");
    let (f, recorder) = stage.fragment("busy");
    stage.manager().add_fragment(&f, "main").unwrap();
    stage.settle().unwrap();
    let before = recorder.render_count();

    let settles: Vec<_> = (0..8).map(|_| f.request_update()).collect();
    stage.flush().unwrap();
    assert_eq!(recorder.render_count(), before + 1);
    assert!(settles.iter().all(|s| s.peek() == Some(Ok(false))));
    assert!(f.update_complete().peek() == Some(Ok(false)));
}

#[test]
fn render_failure_stays_local_to_its_fragment() {
    let stage = Stage::new();
    stage.place("main");
    let (bad, bad_recorder) = stage.fragment("bad");
    let (good, good_recorder) = stage.fragment("good");
    let manager = stage.manager();
    bad_recorder.set_fail_render(true);

    manager.add_fragment(&bad, "main").unwrap();
    manager.add_fragment(&good, "main").unwrap();
    manager.show_fragment(&bad).unwrap();
    manager.show_fragment(&good).unwrap();
    stage.settle().unwrap();
    good_recorder.finish_all();
    stage.settle().unwrap();

    assert_eq!(good.state(), FragmentState::Visible);
    assert_eq!(bad.state(), FragmentState::Visible);

    let settle = bad.request_update();
    stage.flush().unwrap();
    assert!(matches!(settle.peek(), Some(Err(Error::RenderFailure { .. }))));
}

#[test]
fn failing_animation_hook_does_not_stall_the_manager() {
    let stage = Stage::new();
    stage.place("main");
    let (f, recorder) = stage.fragment("broken");
    recorder.set_fail_animations(true);

    stage.manager().add_fragment(&f, "main").unwrap();
    stage.manager().show_fragment(&f).unwrap();
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Visible);
    assert!(stage.is_quiet());
}

#[test]
fn push_and_pop_navigate_between_configurations() {
    let stage = Stage::new();
    stage.place("main");
    let (list, list_recorder) = stage.fragment("list");
    let (detail, detail_recorder) = stage.fragment("detail");
    let manager = stage.manager();
    list_recorder.set_instant(true);
    detail_recorder.set_instant(true);

    manager.add_fragment(&list, "main").unwrap();
    manager.show_fragment(&list).unwrap();
    stage.settle().unwrap();
    manager.push_config_to_stack();
    assert_eq!(manager.stack_depth(), 1);

    manager.hide_fragment(&list).unwrap();
    manager.add_fragment(&detail, "main").unwrap();
    manager.show_fragment(&detail).unwrap();
    stage.settle().unwrap();
    assert_eq!(list.state(), FragmentState::Hidden);
    assert_eq!(detail.state(), FragmentState::Visible);

    assert!(manager.pop_config_from_stack());
    stage.settle().unwrap();
    assert_eq!(list.state(), FragmentState::Visible);
    assert_eq!(detail.state(), FragmentState::Disposed);
    assert_eq!(manager.target_of(detail.id()), None);
    assert_eq!(manager.target_of(list.id()), Some(Target::Visible));
    assert!(!manager.pop_config_from_stack());
}

#[test]
fn showing_a_hiding_fragment_that_was_removed_is_rejected() {
    let stage = Stage::new();
    stage.place("main");
    let (f, recorder) = stage.fragment("ghost");
    let manager = stage.manager();

    manager.add_fragment(&f, "main").unwrap();
    manager.show_fragment(&f).unwrap();
    stage.settle().unwrap();
    recorder.finish_all();
    stage.settle().unwrap();

    manager.remove_fragment(&f);
    stage.settle().unwrap();
    assert_eq!(f.state(), FragmentState::Hiding);

    manager.add_fragment(&f, "main").unwrap();
    manager.show_fragment(&f).unwrap();
    let err = stage.render().unwrap_err();
    assert!(matches!(err, Error::ContractViolation { .. }));
    assert!(manager.has_pending(), "rejected edit is kept for the caller");
}

#[test]
fn reduced_motion_settles_without_runs() {
    let stage = Stage::with_policy(StagePolicy::reduced_motion());
    stage.place("main");
    let (f, recorder) = stage.fragment("calm");
    stage.manager().add_fragment(&f, "main").unwrap();
    stage.manager().show_fragment(&f).unwrap();
    stage.settle().unwrap();

    assert_eq!(f.state(), FragmentState::Visible);
    assert!(recorder.all_runs().is_empty());
    assert!(recorder.rendered(FragmentState::Showing));
}

#[test]
fn extra_payload_travels_with_snapshots() {
    let stage = Stage::new();
    let manager = stage.manager();
    let crumbs: Rc<dyn std::any::Any> = Rc::new(vec!["home"]);
    manager.set_extra(Some(Rc::clone(&crumbs)));
    stage.settle().unwrap();
    manager.push_config_to_stack();

    manager.set_extra(None);
    stage.settle().unwrap();
    assert!(manager.extra().is_none());

    manager.pop_config_from_stack();
    stage.settle().unwrap();
    let restored = manager.extra().unwrap();
    assert!(Rc::ptr_eq(&restored, &crumbs));
}
