pub mod bus;
pub mod commands;
pub mod queries;
pub mod reconciler;
pub mod registry;
pub mod stream;
pub mod transport;
pub mod workflow;

// Re-exports
pub use bus::{EventBus, SubscriptionId};
pub use commands::Command;
pub use queries::{PresentationHandle, StatusMirror};
pub use reconciler::{ReconcileOutcome, ReconcileStats, ReconcilerConfig, StatusReconciler};
pub use registry::{RegistryConfig, RequestRegistry};
pub use stream::{StreamChannel, StreamConfig};
pub use transport::{AskRequest, ChatMessage, TransportClient};
pub use workflow::{CommitWorkflow, WorkflowState};
