pub mod attr;
pub mod interner;
pub mod value;

pub use attr::Attr;
pub use interner::{Symbol, intern};
pub use value::{ArrayKey, Val, Visibility};
