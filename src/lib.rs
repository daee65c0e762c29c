pub mod compiler;
pub mod core;
pub mod runtime;
pub mod vm;
