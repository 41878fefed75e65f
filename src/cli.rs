use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use minds_link_core::app::Command;
use minds_link_core::ports::AppConfig;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug, PartialEq)]
#[command(name = "minds-link")]
#[command(about = "Talk to a running Godot Minds backend: git status, commits, AI questions and the live stream")]
pub struct CliArgs {
    /// Backend host (overrides config)
    #[arg(long, env = "MINDS_HOST")]
    pub host: Option<String>,

    /// Backend port (overrides config)
    #[arg(long, env = "MINDS_PORT")]
    pub port: Option<u16>,

    /// Path to configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Show staged and unstaged files
    Status,

    /// Show the diff of one file
    Diff { path: String },

    /// Stage files
    Stage {
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Unstage files
    Unstage {
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Commit everything that is staged
    Commit {
        #[arg(short, long)]
        message: String,
    },

    /// Generate a commit message for the staged files
    GenerateMessage,

    /// List branches
    Branches,

    /// Show recent commits
    Log {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: u32,
    },

    /// Switch branches
    Checkout {
        branch: String,
        /// Create the branch first
        #[arg(short = 'b', long)]
        create: bool,
    },

    /// Ask the assistant a question
    Ask {
        prompt: String,
        /// File the question is about
        #[arg(long)]
        file: Option<String>,
    },

    /// Ask over the live stream and print the answer as it arrives
    StreamAsk { prompt: String },

    /// One chat turn
    Chat { message: String },

    /// Suggest a completion at a cursor position in a file
    Complete {
        path: String,
        #[arg(long, default_value_t = 0)]
        line: u32,
        #[arg(long, default_value_t = 0)]
        column: u32,
        /// Ask over the live stream instead of HTTP
        #[arg(long)]
        stream: bool,
    },

    /// Index a project for code search
    Index {
        #[arg(default_value = ".")]
        path: String,
        /// Rebuild the index from scratch
        #[arg(long)]
        force: bool,
    },

    /// Search the code index
    Search {
        query: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        max_results: u32,
    },

    /// Show code index statistics
    IndexStats,

    /// Drop the code index
    IndexClear,

    /// Stay connected and print stream events and status changes
    Watch,
}

impl CliArgs {
    /// Apply host/port flags on top of the loaded config
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.backend.host = host.clone();
        }
        if let Some(port) = self.port {
            config.backend.port = port;
        }
    }
}

impl CliCommand {
    /// The session command this subcommand issues, if any
    pub fn to_command(&self) -> Option<Command> {
        Some(match self {
            CliCommand::Status => Command::RefreshStatus,
            CliCommand::Diff { path } => Command::ShowDiff { path: path.clone() },
            CliCommand::Stage { files } => Command::Stage {
                files: files.clone(),
            },
            CliCommand::Unstage { files } => Command::Unstage {
                files: files.clone(),
            },
            CliCommand::Commit { message } => Command::Commit {
                message: message.clone(),
            },
            CliCommand::GenerateMessage => Command::GenerateMessage,
            CliCommand::Branches => Command::ListBranches,
            CliCommand::Log { limit } => Command::ShowLog { limit: *limit },
            CliCommand::Checkout { branch, create } => Command::Checkout {
                branch: branch.clone(),
                create_new: *create,
            },
            CliCommand::Ask { prompt, file } => Command::Ask {
                prompt: prompt.clone(),
                file_path: file.clone(),
            },
            CliCommand::StreamAsk { prompt } => Command::StreamAsk {
                prompt: prompt.clone(),
            },
            CliCommand::Chat { message } => Command::Chat {
                message: message.clone(),
            },
            CliCommand::Complete {
                path,
                line,
                column,
                stream,
            } => {
                let file_path = path.clone();
                let file_content = String::new();
                if *stream {
                    Command::StreamComplete {
                        file_path,
                        file_content,
                        cursor_line: *line,
                        cursor_column: *column,
                    }
                } else {
                    Command::Complete {
                        file_path,
                        file_content,
                        cursor_line: *line,
                        cursor_column: *column,
                    }
                }
            }
            CliCommand::Index { path, force } => Command::IndexProject {
                project_path: path.clone(),
                force_reindex: *force,
            },
            CliCommand::Search { query, max_results } => Command::Search {
                query: query.clone(),
                max_results: *max_results,
            },
            CliCommand::IndexStats => Command::IndexStats,
            CliCommand::IndexClear => Command::ClearIndex,
            CliCommand::Watch => return None,
        })
    }

    /// Like `to_command`, with the file a completion is asked for read from
    /// disk
    pub fn resolve(&self) -> Result<Option<Command>> {
        let mut command = self.to_command();
        if let Some(
            Command::Complete {
                file_path,
                file_content,
                ..
            }
            | Command::StreamComplete {
                file_path,
                file_content,
                ..
            },
        ) = command.as_mut()
        {
            *file_content = fs::read_to_string(&*file_path)
                .with_context(|| format!("Failed to read {}", file_path))?;
        }
        Ok(command)
    }

    /// Commands answered over the stream rather than by one HTTP reply
    pub fn uses_stream(&self) -> bool {
        matches!(
            self,
            CliCommand::StreamAsk { .. } | CliCommand::Complete { stream: true, .. }
        )
    }

    /// Commands that read the staged set need a status snapshot first
    pub fn needs_status(&self) -> bool {
        matches!(self, CliCommand::Commit { .. } | CliCommand::GenerateMessage)
    }
}
