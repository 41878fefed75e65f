pub mod commit;
pub mod diff;
pub mod events;
pub mod request;
pub mod status;

// Re-exports for convenience
pub use commit::*;
pub use diff::*;
pub use events::*;
pub use request::*;
pub use status::*;
