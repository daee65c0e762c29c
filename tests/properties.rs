mod common;

use common::{define, define_err, engine, request};
use php_class_linker::compiler::decl::{ClassDecl, FuncDecl, PropDecl};
use php_class_linker::core::{Attr, Val, intern};
use php_class_linker::runtime::context::RequestContext;
use php_class_linker::runtime::error::RuntimeError;
use php_class_linker::runtime::init::InitScratch;
use php_class_linker::vm::object::{Instance, call_method, instantiate};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_static_storage_shared_across_three_levels() {
    let engine = engine();
    let mut ctx = request(&engine);
    let a = define(
        &mut ctx,
        ClassDecl::class("A").prop(PropDecl::new("x", Attr::PUBLIC | Attr::STATIC, Val::Int(1))),
    );
    let b = define(&mut ctx, ClassDecl::class("B").extends("A"));
    let c = define(&mut ctx, ClassDecl::class("C").extends("B"));
    let x = intern("x");

    let slot_a = ctx.static_slot(&a, x, None).unwrap();
    assert_eq!(ctx.static_slot(&b, x, None).unwrap(), slot_a);
    assert_eq!(ctx.static_slot(&c, x, None).unwrap(), slot_a);
    assert_eq!(slot_a.owner, a.id());

    ctx.set_static_value(&c, x, None, Val::Int(42)).unwrap();
    assert_eq!(ctx.get_static_value(&a, x, None).unwrap(), Val::Int(42));
    assert_eq!(ctx.get_static_value(&b, x, None).unwrap(), Val::Int(42));

    ctx.set_static_value(&a, x, None, Val::Int(7)).unwrap();
    assert_eq!(ctx.get_static_value(&c, x, None).unwrap(), Val::Int(7));
}

#[test]
fn test_redeclared_static_gets_own_storage() {
    let engine = engine();
    let mut ctx = request(&engine);
    let a = define(
        &mut ctx,
        ClassDecl::class("Cfg").prop(PropDecl::new("mode", Attr::PUBLIC | Attr::STATIC, Val::string("a"))),
    );
    let b = define(
        &mut ctx,
        ClassDecl::class("CfgChild")
            .extends("Cfg")
            .prop(PropDecl::new("mode", Attr::PUBLIC | Attr::STATIC, Val::string("b"))),
    );
    let mode = intern("mode");
    ctx.set_static_value(&b, mode, None, Val::string("changed")).unwrap();
    assert_eq!(ctx.get_static_value(&a, mode, None).unwrap(), Val::string("a"));
    assert_eq!(ctx.get_static_value(&b, mode, None).unwrap(), Val::string("changed"));
}

#[test]
fn test_static_access_is_checked_at_runtime() {
    let engine = engine();
    let mut ctx = request(&engine);
    let a = define(
        &mut ctx,
        ClassDecl::class("Vault")
            .prop(PropDecl::new("key", Attr::PROTECTED | Attr::STATIC, Val::Int(1))),
    );
    let b = define(&mut ctx, ClassDecl::class("VaultChild").extends("Vault"));
    let key = intern("key");

    let err = ctx.get_static_value(&a, key, None).unwrap_err();
    assert_eq!(err.to_string(), "Cannot access protected property Vault::$key");
    assert_eq!(ctx.get_static_value(&a, key, Some(&b)).unwrap(), Val::Int(1));

    let err = ctx.get_static_value(&a, intern("nope"), Some(&a)).unwrap_err();
    assert!(matches!(err, RuntimeError::UndefinedStaticProperty { .. }));
}

#[test]
fn test_private_properties_shadow_per_class() {
    let engine = engine();
    let mut ctx = request(&engine);
    let base = define(
        &mut ctx,
        ClassDecl::class("Holder")
            .prop(PropDecl::new("p", Attr::PRIVATE, Val::string("base")))
            .method(FuncDecl::new("baseP").native(|call| call.this_prop(intern("p")))),
    );
    let child = define(
        &mut ctx,
        ClassDecl::class("SubHolder")
            .extends("Holder")
            .prop(PropDecl::new("p", Attr::PRIVATE, Val::string("child")))
            .method(FuncDecl::new("childP").native(|call| call.this_prop(intern("p"))))
            .method(FuncDecl::new("setChildP").native(|call| {
                let v = call.arg(0);
                call.set_this_prop(intern("p"), v)?;
                Ok(Val::Null)
            })),
    );

    assert_eq!(child.num_decl_props(), 2);
    assert_eq!(child.num_accessible_decl_props(), 1);
    assert_ne!(child.decl_prop_offset(0), child.decl_prop_offset(1));

    let mut obj = instantiate(&mut ctx, &child).unwrap();
    let p = |ctx: &mut RequestContext, obj: &mut Instance, m: &str| {
        call_method(ctx, &child, Some(obj), intern(m), &[], None).unwrap()
    };
    assert_eq!(p(&mut ctx, &mut obj, "baseP"), Val::string("base"));
    assert_eq!(p(&mut ctx, &mut obj, "childP"), Val::string("child"));

    call_method(
        &mut ctx,
        &child,
        Some(&mut obj),
        intern("setChildP"),
        &[Val::Int(5)],
        None,
    )
    .unwrap();
    assert_eq!(p(&mut ctx, &mut obj, "childP"), Val::Int(5));
    assert_eq!(p(&mut ctx, &mut obj, "baseP"), Val::string("base"));

    // Neither slot is reachable from outside.
    assert!(obj.get_prop(intern("p"), None).is_err());
    assert_eq!(obj.get_prop(intern("p"), Some(&base)).unwrap(), &Val::string("base"));
}

#[test]
fn test_protected_widened_then_renarrowed() {
    let engine = engine();
    let mut ctx = request(&engine);
    define(
        &mut ctx,
        ClassDecl::class("Guarded").prop(PropDecl::new("v", Attr::PROTECTED, Val::Int(1))),
    );
    let open = define(
        &mut ctx,
        ClassDecl::class("Opened")
            .extends("Guarded")
            .prop(PropDecl::new("v", Attr::PUBLIC, Val::Int(2))),
    );
    assert_eq!(open.num_decl_props(), 1);
    let obj = instantiate(&mut ctx, &open).unwrap();
    assert_eq!(obj.get_prop(intern("v"), None).unwrap(), &Val::Int(2));

    let err = define_err(
        &mut ctx,
        ClassDecl::class("Reclosed")
            .extends("Opened")
            .prop(PropDecl::new("v", Attr::PROTECTED, Val::Int(3))),
    );
    assert_eq!(err.kind(), "PropertyRedeclaration");
}

#[test]
fn test_static_and_instance_cannot_swap() {
    let engine = engine();
    let mut ctx = request(&engine);
    define(
        &mut ctx,
        ClassDecl::class("Plain").prop(PropDecl::new("n", Attr::PUBLIC, Val::Null)),
    );
    let err = define_err(
        &mut ctx,
        ClassDecl::class("Flipped")
            .extends("Plain")
            .prop(PropDecl::new("n", Attr::PUBLIC | Attr::STATIC, Val::Null)),
    );
    assert_eq!(err.kind(), "PropertyRedeclaration");
}

#[test]
fn test_lazy_init_runs_once_per_context() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let decl = ClassDecl::class("Lazy")
        .prop(PropDecl::new("table", Attr::PUBLIC, Val::Uninit))
        .prop(PropDecl::new("n", Attr::PUBLIC, Val::Int(3)))
        .method(FuncDecl::pinit(move |s: &mut InitScratch<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            s.set("table", Val::from_json(&serde_json::json!([1, 2, 3])));
            Ok(())
        }))
        .build();

    let engine = engine();
    let mut ctx = request(&engine);
    let cls = ctx.define_class(&decl).unwrap();

    let first = ctx.init_props(&cls).unwrap();
    let second = ctx.init_props(&cls).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(first.is_deep(0));
    assert!(!first.is_deep(1));

    let a = instantiate(&mut ctx, &cls).unwrap();
    let b = instantiate(&mut ctx, &cls).unwrap();
    assert_eq!(a.props(), b.props());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // A new context computes its own copy.
    drop(ctx);
    let mut ctx = request(&engine);
    let cls = ctx.define_class(&decl).unwrap();
    ctx.init_props(&cls).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_initializer_can_be_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let decl = ClassDecl::class("Flaky")
        .prop(PropDecl::new("v", Attr::PUBLIC, Val::Uninit))
        .method(FuncDecl::pinit(move |s: &mut InitScratch<'_>| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(RuntimeError::initializer(intern("Flaky"), "not yet"));
            }
            s.set("v", Val::Int(1));
            Ok(())
        }))
        .build();

    let engine = engine();
    let mut ctx = request(&engine);
    let cls = ctx.define_class(&decl).unwrap();
    let err = instantiate(&mut ctx, &cls).unwrap_err();
    assert_eq!(err.to_string(), "Initializer for Flaky failed: not yet");
    let obj = instantiate(&mut ctx, &cls).unwrap();
    assert_eq!(obj.props(), &[Val::Int(1)]);
}

#[test]
fn test_static_initializer_inherited_value_lands_in_owner() {
    let engine = engine();
    let mut ctx = request(&engine);
    let root = define(
        &mut ctx,
        ClassDecl::class("Registry")
            .prop(PropDecl::new("items", Attr::PUBLIC | Attr::STATIC, Val::Uninit))
            .method(FuncDecl::sinit(|s: &mut InitScratch<'_>| {
                if s.is_pending(intern("items")) {
                    s.set("items", Val::Int(0));
                }
                Ok(())
            })),
    );
    let leaf = define(&mut ctx, ClassDecl::class("SubRegistry").extends("Registry"));
    let items = intern("items");

    assert_eq!(ctx.get_static_value(&leaf, items, None).unwrap(), Val::Int(0));
    ctx.set_static_value(&root, items, None, Val::Int(9)).unwrap();
    assert_eq!(ctx.get_static_value(&leaf, items, None).unwrap(), Val::Int(9));
}

#[test]
fn test_private_property_wins_over_public_redeclaration() {
    let engine = engine();
    let mut ctx = request(&engine);
    let base = define(
        &mut ctx,
        ClassDecl::class("Ledger")
            .prop(PropDecl::new("p", Attr::PRIVATE, Val::Int(1)))
            .method(FuncDecl::new("ledgerP").native(|call| call.this_prop(intern("p")))),
    );
    let child = define(
        &mut ctx,
        ClassDecl::class("OpenLedger")
            .extends("Ledger")
            .prop(PropDecl::new("p", Attr::PUBLIC, Val::Int(2))),
    );
    assert_eq!(child.num_decl_props(), 2);

    let mut obj = instantiate(&mut ctx, &child).unwrap();
    let seen = call_method(&mut ctx, &child, Some(&mut obj), intern("ledgerP"), &[], None).unwrap();
    assert_eq!(seen, Val::Int(1));
    assert_eq!(obj.get_prop(intern("p"), None).unwrap(), &Val::Int(2));
    assert_eq!(obj.get_prop(intern("p"), Some(&base)).unwrap(), &Val::Int(1));

    obj.set_prop(intern("p"), None, Val::Int(20)).unwrap();
    assert_eq!(obj.get_prop(intern("p"), Some(&base)).unwrap(), &Val::Int(1));
}

#[test]
fn test_initializer_reads_scalar_sibling() {
    let engine = engine();
    let mut ctx = request(&engine);
    let cls = define(
        &mut ctx,
        ClassDecl::class("Scaled")
            .prop(PropDecl::new("factor", Attr::PUBLIC, Val::Int(3)))
            .prop(PropDecl::new("scaled", Attr::PUBLIC, Val::Uninit))
            .method(FuncDecl::pinit(|s: &mut InitScratch<'_>| {
                let factor = s.get("factor").cloned().unwrap_or(Val::Null);
                s.set("scaled", factor);
                Ok(())
            })),
    );
    let obj = instantiate(&mut ctx, &cls).unwrap();
    assert_eq!(obj.props(), &[Val::Int(3), Val::Int(3)]);
}
