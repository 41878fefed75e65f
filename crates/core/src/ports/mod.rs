pub mod editor;
pub mod http;
pub mod persistence;
pub mod stream;
pub mod time;

// Re-exports
pub use editor::*;
pub use http::*;
pub use persistence::*;
pub use stream::*;
pub use time::*;
