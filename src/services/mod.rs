pub mod render;
pub mod session;

pub use render::{render_response, render_status, render_stream_event, render_workflow_event};
pub use session::{Session, SessionUpdate};
