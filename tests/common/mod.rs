//! Common test helpers for class-linker tests
//!
//! Builds engines and request contexts and defines declarations in them so
//! individual tests only describe the class graph they care about.

#![allow(dead_code)]

use php_class_linker::compiler::decl::ClassDecl;
use php_class_linker::compiler::manifest::ClassManifest;
use php_class_linker::runtime::class::LinkedClass;
use php_class_linker::runtime::context::{EngineBuilder, EngineContext, RequestContext};
use php_class_linker::runtime::error::LinkError;
use std::sync::Arc;

/// Engine with default configuration and no autoloader.
pub fn engine() -> Arc<EngineContext> {
    EngineBuilder::new().build()
}

/// Engine autoloading from a JSON manifest.
pub fn manifest_engine(json: &str) -> Arc<EngineContext> {
    let manifest = ClassManifest::from_json(json).expect("manifest should parse");
    EngineBuilder::new().with_autoloader(manifest).build()
}

/// Fresh execution context on `engine`.
pub fn request(engine: &Arc<EngineContext>) -> RequestContext {
    RequestContext::new(Arc::clone(engine))
}

/// Define `decl` and panic with the linkage error if it fails.
pub fn define(ctx: &mut RequestContext, decl: ClassDecl) -> Arc<LinkedClass> {
    let decl = decl.build();
    match ctx.define_class(&decl) {
        Ok(cls) => cls,
        Err(err) => panic!("defining {} failed: {}", decl.name, err),
    }
}

/// Define `decl`, expecting a linkage error.
pub fn define_err(ctx: &mut RequestContext, decl: ClassDecl) -> LinkError {
    let decl = decl.build();
    match ctx.define_class(&decl) {
        Ok(cls) => panic!("defining {} unexpectedly succeeded", cls.name()),
        Err(err) => err,
    }
}
