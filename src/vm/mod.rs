pub mod object;
pub mod visibility;
