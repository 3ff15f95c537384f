pub mod attr;
pub mod common;
pub mod entity;
pub mod expr;
pub mod filter;
pub mod params;

pub use attr::*;
pub use common::*;
pub use entity::*;
pub use expr::*;
pub use filter::*;
pub use params::*;
