mod common;

use common::{define, engine, request};
use php_class_linker::compiler::decl::{ClassDecl, PropDecl};
use php_class_linker::core::{Attr, Val, intern};
use php_class_linker::runtime::class::ClassState;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

#[test]
fn test_destroyed_class_waits_for_older_contexts() {
    let engine = engine();
    let mut first = request(&engine);
    let cls = define(
        &mut first,
        ClassDecl::class("Victim").prop(PropDecl::new("v", Attr::PUBLIC, Val::Int(1))),
    );
    let stamp = cls.layout_stamp();
    assert!(cls.validate_layout(stamp));

    let second = request(&engine);
    assert!(engine.registry.destroy_class(&cls));
    assert_eq!(cls.state(), ClassState::ZombiePendingFree);
    assert!(!cls.validate_layout(stamp));
    assert!(first.lookup_class(intern("Victim")).is_none());
    assert_eq!(engine.registry.treadmill().pending_len(), 1);

    drop(first);
    assert_eq!(cls.state(), ClassState::ZombiePendingFree);
    drop(second);
    assert_eq!(cls.state(), ClassState::Freed);
    assert_eq!(engine.registry.treadmill().pending_len(), 0);
    // Only this handle is left once the treadmill lets go.
    assert_eq!(Arc::strong_count(&cls), 1);
}

#[test]
fn test_contexts_started_later_do_not_hold_reclamation() {
    let engine = engine();
    let mut ctx = request(&engine);
    let cls = define(&mut ctx, ClassDecl::class("Brief"));
    engine.registry.destroy_class(&cls);

    let late = request(&engine);
    drop(ctx);
    assert_eq!(cls.state(), ClassState::Freed);
    assert_eq!(engine.registry.treadmill().active_requests(), 1);
    drop(late);
}

#[test]
fn test_checkpoint_releases_retired_classes() {
    let engine = engine();
    let mut ctx = request(&engine);
    let cls = define(&mut ctx, ClassDecl::class("Checkpointed"));
    engine.registry.destroy_class(&cls);
    assert_eq!(cls.state(), ClassState::ZombiePendingFree);

    ctx.checkpoint();
    assert_eq!(cls.state(), ClassState::Freed);
}

#[test]
fn test_context_on_another_thread_holds_reclamation() {
    let engine = engine();
    let mut ctx = request(&engine);
    let cls = define(&mut ctx, ClassDecl::class("Threaded"));

    let (started_tx, started_rx) = mpsc::channel();
    let (finish_tx, finish_rx) = mpsc::channel::<()>();
    let worker_engine = Arc::clone(&engine);
    let worker = thread::spawn(move || {
        let worker_ctx = request(&worker_engine);
        started_tx.send(()).unwrap();
        finish_rx.recv().unwrap();
        drop(worker_ctx);
    });

    started_rx.recv().unwrap();
    engine.registry.destroy_class(&cls);
    drop(ctx);
    assert_eq!(cls.state(), ClassState::ZombiePendingFree);

    finish_tx.send(()).unwrap();
    worker.join().unwrap();
    assert_eq!(cls.state(), ClassState::Freed);
}

#[test]
fn test_destroyed_class_is_relinked_on_next_definition() {
    let engine = engine();
    let decl = ClassDecl::class("Phoenix").build();

    let mut one = request(&engine);
    let old = one.define_class(&decl).unwrap();
    engine.registry.destroy_class(&old);
    drop(one);

    let mut two = request(&engine);
    let new = two.define_class(&decl).unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(new.state(), ClassState::Active);
    assert_ne!(new.id(), old.id());
    let entity = engine.registry.find_entity(intern("Phoenix")).unwrap();
    assert_eq!(entity.classes().len(), 1);
}

#[test]
fn test_zombie_dependency_takes_dependent_down() {
    let engine = engine();
    let base_decl = ClassDecl::class("Footing").build();
    let child_decl = ClassDecl::class("Tower").extends("Footing").build();

    let mut one = request(&engine);
    let old_base = one.define_class(&base_decl).unwrap();
    let old_child = one.define_class(&child_decl).unwrap();
    engine.registry.destroy_class(&old_base);

    let mut two = request(&engine);
    let new_base = two.define_class(&base_decl).unwrap();
    let new_child = two.define_class(&child_decl).unwrap();

    assert!(old_child.is_zombie());
    assert!(!Arc::ptr_eq(&old_child, &new_child));
    assert!(Arc::ptr_eq(&new_child.parent().unwrap(), &new_base));

    drop(one);
    drop(two);
    assert_eq!(old_base.state(), ClassState::Freed);
    assert_eq!(old_child.state(), ClassState::Freed);
}
