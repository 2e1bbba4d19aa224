pub mod manager;
pub mod selector;

pub use manager::*;
pub use selector::*;
