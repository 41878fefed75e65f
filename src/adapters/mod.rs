pub mod http;
pub mod persistence;
pub mod websocket;

// Re-exports
pub use http::ReqwestHttpAdapter;
pub use persistence::FileConfigStore;
pub use websocket::TungsteniteStreamAdapter;
