//! Session & Action Log persistence (spec §3, §4.8).
//!
//! Owns the write-through rules for Session/Action/ConversationMessage/
//! CodeSnippet rows and the session-export Document materialization that
//! happens on `session_end`. The webhook handlers in [`crate::webhook`] are
//! thin HTTP adapters over the functions here.

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    Action, CodeSnippet, ConversationMessage, MessageType, Session, SessionStatus, SourceItem,
};
use crate::orchestrator::Orchestrator;
use crate::store::RvStore;

/// `<prefix>_<unix_ms>_<rand8>`, e.g. `act_1735689600000_a1b2c3d4`.
/// The random suffix is the first 8 hex characters of a fresh UUIDv4's
/// simple form, reusing the `uuid` crate's RNG rather than adding one.
pub fn generate_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("{prefix}_{millis}_{suffix}")
}

pub async fn start_session(
    rv: &RvStore,
    session_id: &str,
    agent_type: &str,
    user_id: &str,
    project: &str,
    context_json: &str,
) -> Result<()> {
    let session = Session {
        session_id: session_id.to_string(),
        agent_type: agent_type.to_string(),
        user_id: user_id.to_string(),
        project: project.to_string(),
        start_time: Utc::now().timestamp(),
        end_time: None,
        status: SessionStatus::Active,
        context_json: context_json.to_string(),
    };
    rv.upsert_session(&session).await
}

/// Ends a session and materializes its transcript as a searchable
/// `session-export` Document (spec §4.8 session_end rule).
pub async fn end_session(
    rv: &RvStore,
    orchestrator: &Orchestrator,
    session_id: &str,
) -> Result<Option<Uuid>> {
    let mut session = match rv.get_session(session_id).await? {
        Some(s) => s,
        None => return Ok(None),
    };
    // Preserve a status the caller already computed (e.g. `Crashed` from a
    // session_end webhook with a crash reason) — only promote Active sessions.
    if session.end_time.is_none() {
        session.end_time = Some(Utc::now().timestamp());
    }
    if session.status == SessionStatus::Active {
        session.status = SessionStatus::Ended;
    }
    rv.upsert_session(&session).await?;

    let messages = rv.list_messages(session_id).await?;
    let actions = rv.list_actions(session_id).await?;
    if messages.is_empty() && actions.is_empty() {
        return Ok(None);
    }

    let transcript = render_transcript(&messages, &actions);
    let item = SourceItem {
        source: "session".to_string(),
        source_id: session_id.to_string(),
        source_url: None,
        title: Some(format!("Session {session_id}")),
        author: Some(session.user_id.clone()),
        created_at: chrono::DateTime::from_timestamp(session.start_time, 0).unwrap_or_else(Utc::now),
        updated_at: Utc::now(),
        content_type: "text/markdown".to_string(),
        body: transcript,
        metadata_json: format!(
            r#"{{"agent_type":"{}","session_id":"{}"}}"#,
            session.agent_type, session_id
        ),
        raw_json: None,
        raw_bytes: None,
    };

    let job_id = orchestrator.ingest_item(&session.project, item, crate::job_queue::Priority::Batch, false);
    Ok(Some(job_id))
}

fn render_transcript(messages: &[ConversationMessage], actions: &[Action]) -> String {
    let mut out = String::new();
    for m in messages {
        out.push_str(&format!("## {}\n\n{}\n\n", m.message_type.as_str(), m.content));
    }
    if !actions.is_empty() {
        out.push_str("## Actions\n\n");
        for a in actions {
            out.push_str(&format!("- [{}] {}\n", a.action_type, a.description));
        }
    }
    out
}

pub async fn record_action(
    rv: &RvStore,
    session_id: &str,
    action_type: &str,
    description: &str,
    details_json: &str,
    files_affected_json: &str,
    success: bool,
) -> Result<String> {
    let action_id = generate_id("act");
    let action = Action {
        action_id: action_id.clone(),
        session_id: session_id.to_string(),
        action_type: action_type.to_string(),
        description: description.to_string(),
        details_json: details_json.to_string(),
        files_affected_json: files_affected_json.to_string(),
        success,
        created_at: Utc::now().timestamp(),
    };
    rv.insert_action(&action).await?;
    Ok(action_id)
}

/// Inserts a conversation message and extracts any fenced code blocks into
/// `code_snippets` rows (spec §4.8 CodeSnippet extraction).
pub async fn record_message(
    rv: &RvStore,
    session_id: &str,
    message_type: MessageType,
    content: &str,
    context_json: &str,
    reasoning: Option<&str>,
    tools_used_json: &str,
    files_referenced_json: &str,
) -> Result<String> {
    let message_id = generate_id("msg");
    let message = ConversationMessage {
        message_id: message_id.clone(),
        session_id: session_id.to_string(),
        message_type,
        content: content.to_string(),
        context_json: context_json.to_string(),
        reasoning: reasoning.map(|s| s.to_string()),
        tools_used_json: tools_used_json.to_string(),
        files_referenced_json: files_referenced_json.to_string(),
        created_at: Utc::now().timestamp(),
    };
    rv.insert_message(&message).await?;

    for (language, code) in extract_fenced_code_blocks(content) {
        let snippet = CodeSnippet {
            id: generate_id("snip"),
            message_id: message_id.clone(),
            session_id: session_id.to_string(),
            language,
            code,
            extracted_at: Utc::now().timestamp(),
        };
        rv.insert_code_snippet(&snippet).await?;
    }

    Ok(message_id)
}

/// Scans for ` ```lang\n...\n``` ` blocks. No regex crate appears in the
/// corpus for a scan this simple, so this is a hand-written `find`/`split` walk.
pub fn extract_fenced_code_blocks(content: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let line_end = after_fence.find('\n').unwrap_or(after_fence.len());
        let lang = after_fence[..line_end].trim().to_string();
        let body_start = line_end + 1;
        if body_start > after_fence.len() {
            break;
        }
        let body = &after_fence[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        let code = body[..close].trim_end_matches('\n').to_string();
        let lang = if lang.is_empty() { "text".to_string() } else { lang };
        blocks.push((lang, code));
        rest = &body[close + 3..];
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix_and_are_unique() {
        let a = generate_id("act");
        let b = generate_id("act");
        assert!(a.starts_with("act_"));
        assert_ne!(a, b);
    }

    #[test]
    fn extracts_single_fenced_block_with_language() {
        let content = "before\n```rust\nfn main() {}\n```\nafter";
        let blocks = extract_fenced_code_blocks(content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].0, "rust");
        assert_eq!(blocks[0].1, "fn main() {}");
    }

    #[test]
    fn extracts_multiple_blocks_and_defaults_language() {
        let content = "```\nplain\n```\nmiddle\n```python\nprint(1)\n```";
        let blocks = extract_fenced_code_blocks(content);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, "text");
        assert_eq!(blocks[1].0, "python");
    }

    #[test]
    fn unclosed_fence_yields_no_block() {
        let content = "```rust\nfn main() {}";
        assert!(extract_fenced_code_blocks(content).is_empty());
    }
}
