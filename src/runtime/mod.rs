pub mod avail;
pub mod class;
pub mod constants;
pub mod context;
pub mod error;
pub mod func;
pub mod init;
pub mod interfaces;
pub mod linker;
pub mod methods;
pub mod props;
pub mod reflect;
pub mod registry;
pub mod traits;
pub mod treadmill;
