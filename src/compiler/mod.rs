pub mod decl;
pub mod manifest;
