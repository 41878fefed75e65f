/// Commands that can be sent to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Fetch a fresh status snapshot now
    RefreshStatus,

    Stage { files: Vec<String> },

    Unstage { files: Vec<String> },

    /// Commit everything currently staged
    Commit { message: String },

    /// Ask the backend to write a commit message for the staged files
    GenerateMessage,

    ShowDiff { path: String },

    Checkout { branch: String, create_new: bool },

    ListBranches,

    ShowLog { limit: u32 },

    /// One-shot question over HTTP
    Ask { prompt: String, file_path: Option<String> },

    Chat { message: String },

    /// Inline completion over HTTP
    Complete {
        file_path: String,
        file_content: String,
        cursor_line: u32,
        cursor_column: u32,
    },

    /// Question answered token by token over the stream
    StreamAsk { prompt: String },

    /// Inline completion answered by a `completion_suggestion` frame
    StreamComplete {
        file_path: String,
        file_content: String,
        cursor_line: u32,
        cursor_column: u32,
    },

    IndexProject { project_path: String, force_reindex: bool },

    Search { query: String, max_results: u32 },

    IndexStats,

    ClearIndex,

    Connect,

    Disconnect,

    /// Quit the application
    Quit,
}
