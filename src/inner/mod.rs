pub mod builder;
pub mod group;
pub mod id;

pub use builder::*;
pub use group::*;
pub use id::*;
