pub mod cache;
pub mod http;
pub mod traits;

pub use cache::*;
pub use http::*;
pub use traits::*;
