//! Plain-text rendering of channel payloads and events for the CLI

use anyhow::{Context, Result};
use minds_link_core::app::StatusMirror;
use minds_link_core::domain::{
    decode_payload, BranchList, CommitLog, DiffView, OperationReply, StreamEvent, WorkflowEvent,
};
use serde_json::Value;
use std::fmt::Write;

/// Render the mirror as a `git status`-like listing
pub fn render_status(mirror: &StatusMirror) -> String {
    let mut out = String::new();
    let branch = if mirror.branch().is_empty() {
        "(no branch)"
    } else {
        mirror.branch()
    };
    let _ = writeln!(out, "On branch {}", branch);

    if mirror.file_count() == 0 {
        out.push_str("nothing to commit, working tree clean\n");
        return out;
    }
    if !mirror.staged().is_empty() {
        out.push_str("Staged:\n");
        for file in mirror.staged().values() {
            let _ = writeln!(out, "  {:<2} {}", file.status.code(), file.path);
        }
    }
    if !mirror.unstaged().is_empty() {
        out.push_str("Not staged:\n");
        for file in mirror.unstaged().values() {
            let _ = writeln!(out, "  {:<2} {}", file.status.code(), file.path);
        }
    }
    out
}

/// Render the payload of a response channel
pub fn render_response(channel: &str, payload: &Value) -> Result<String> {
    let mut out = String::new();
    match channel {
        "git_diff" => {
            let view = DiffView::from_json(payload)?;
            let diff = view.unified_diff()?;
            let highlights = view.highlights()?;
            let _ = writeln!(
                out,
                "{} ({} removed, {} added)",
                view.file_path,
                highlights.original.len(),
                highlights.new.len()
            );
            out.push_str(&diff);
            if !diff.ends_with('\n') && !diff.is_empty() {
                out.push('\n');
            }
        }
        "git_branches" => {
            let list: BranchList = decode_payload(channel, payload)?;
            for branch in &list.branches {
                let marker = if branch.name() == list.current_branch {
                    '*'
                } else {
                    ' '
                };
                let _ = writeln!(out, "{} {}", marker, branch.name());
            }
        }
        "git_log" => {
            let log: CommitLog = decode_payload(channel, payload)?;
            for commit in &log.commits {
                let _ = writeln!(out, "{}", commit);
            }
        }
        "git_add" | "git_restore" | "git_commit" | "git_checkout" => {
            let reply: OperationReply = decode_payload(channel, payload)?;
            let verdict = if reply.success { "ok" } else { "failed" };
            let _ = writeln!(out, "{}: {}", verdict, reply.message);
        }
        "ai_ask" => {
            let response = text(payload, "response")
                .context("ai_ask payload has no response")?;
            let _ = writeln!(out, "{}", response);
            if let Some(code) = text(payload, "code") {
                let _ = writeln!(out, "\n{}", code);
            }
            if let Some(explanation) = text(payload, "explanation") {
                let _ = writeln!(out, "\n{}", explanation);
            }
        }
        "ai_complete" => {
            let completion = payload
                .get("completion")
                .and_then(Value::as_str)
                .context("ai_complete payload has no completion")?;
            let _ = writeln!(out, "{}", completion);
        }
        "ai_chat" | "ai_commit_message" | "index" | "index_clear" => {
            let message = text(payload, "message")
                .with_context(|| format!("{} payload has no message", channel))?;
            let _ = writeln!(out, "{}", message);
        }
        _ => {
            let pretty =
                serde_json::to_string_pretty(payload).context("Failed to format payload")?;
            let _ = writeln!(out, "{}", pretty);
        }
    }
    Ok(out)
}

/// One line for the stream events worth showing; tokens are printed bare
pub fn render_stream_event(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Connected => Some("[stream connected]\n".to_string()),
        StreamEvent::Disconnected => Some("[stream disconnected]\n".to_string()),
        StreamEvent::StreamStarted => None,
        StreamEvent::Token { token, .. } => Some(token.clone()),
        StreamEvent::Complete { .. } => Some("\n".to_string()),
        StreamEvent::Completion { completion, .. } => Some(format!("{}\n", completion)),
        StreamEvent::FileChanged {
            file_path,
            chunks_updated,
        } => Some(format!("[changed] {} ({} chunks)\n", file_path, chunks_updated)),
        StreamEvent::EditorAction { action, result, .. } => {
            let ok = result.get("success").and_then(Value::as_bool) == Some(true);
            Some(format!(
                "[editor] {} {}\n",
                action,
                if ok { "ok" } else { "failed" }
            ))
        }
        StreamEvent::Error { message } => Some(format!("[stream error] {}\n", message)),
    }
}

pub fn render_workflow_event(event: &WorkflowEvent) -> Option<String> {
    match event {
        WorkflowEvent::Started { .. } => None,
        WorkflowEvent::Finished {
            operation,
            success,
            message,
        } => Some(format!(
            "{} {}: {}",
            operation,
            if *success { "finished" } else { "failed" },
            message
        )),
        WorkflowEvent::ValidationFailed { message, .. } => Some(message.clone()),
        WorkflowEvent::MessageGenerated { message } => Some(message.clone()),
    }
}

fn text<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use minds_link_core::domain::WorkflowOperation;
    use serde_json::json;

    #[test]
    fn test_branches_mark_current() -> Result<()> {
        let rendered = render_response(
            "git_branches",
            &json!({"current_branch": "dev", "branches": ["main", {"name": "dev"}]}),
        )?;
        assert_eq!(rendered, "  main\n* dev\n");
        Ok(())
    }

    #[test]
    fn test_diff_reports_highlight_counts() -> Result<()> {
        let rendered = render_response(
            "git_diff",
            &json!({
                "file_path": "player.gd",
                "diff_text": "@@ -1,2 +1,3 @@\n-old\n+new1\n+new2\n",
                "diff_compressed": null
            }),
        )?;
        assert!(rendered.starts_with("player.gd (1 removed, 2 added)\n"));
        assert!(rendered.ends_with("+new2\n"));
        Ok(())
    }

    #[test]
    fn test_ask_includes_code_and_explanation() -> Result<()> {
        let rendered = render_response(
            "ai_ask",
            &json!({"response": "Use move_and_slide", "code": "move_and_slide()", "explanation": null}),
        )?;
        assert_eq!(rendered, "Use move_and_slide\n\nmove_and_slide()\n");
        Ok(())
    }

    #[test]
    fn test_completion_and_index_replies() -> Result<()> {
        let rendered = render_response(
            "ai_complete",
            &json!({"completion": "velocity.y -= gravity * delta", "multi_line": false}),
        )?;
        assert_eq!(rendered, "velocity.y -= gravity * delta\n");

        let rendered = render_response(
            "index",
            &json!({"status": "success", "files_indexed": 3, "chunks_created": 12,
                    "message": "Indexed 3 files with 12 code chunks"}),
        )?;
        assert_eq!(rendered, "Indexed 3 files with 12 code chunks\n");
        Ok(())
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(render_response("git_log", &json!({"commits": "nope"})).is_err());
        assert!(render_response("ai_chat", &json!({})).is_err());
    }

    #[test]
    fn test_empty_mirror_renders_clean() {
        let rendered = render_status(&StatusMirror::new());
        assert_eq!(
            rendered,
            "On branch (no branch)\nnothing to commit, working tree clean\n"
        );
    }

    #[test]
    fn test_workflow_messages() {
        let finished = WorkflowEvent::Finished {
            operation: WorkflowOperation::Commit,
            success: true,
            message: "Committed abc123".to_string(),
        };
        assert_eq!(
            render_workflow_event(&finished).as_deref(),
            Some("commit finished: Committed abc123")
        );
        assert_eq!(
            render_workflow_event(&WorkflowEvent::Started {
                operation: WorkflowOperation::Stage
            }),
            None
        );
    }
}
