//! Embedding formatted command results into messages for the text-generation step.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use termgate_llm::Message;

const SYSTEM_PREAMBLE: &str = "You are a research assistant with read access to the user's \
terminal. The results below were produced by commands that passed a safety policy. Use them \
as ground truth about the local project.";

/// Where formatted results go in the conversation. The caller picks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum PromptMode {
    /// Prepended into a system message as context.
    #[default]
    #[serde(rename = "system")]
    SystemContext,
    /// Appended to the user's request as an "available commands" list.
    #[serde(rename = "user")]
    UserRequest,
}

impl FromStr for PromptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::SystemContext),
            "user" => Ok(Self::UserRequest),
            other => Err(format!("unknown prompt mode `{other}`, expected system or user")),
        }
    }
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SystemContext => "system",
            Self::UserRequest => "user",
        })
    }
}

#[must_use]
pub fn system_context(rendered: &str) -> Message {
    Message::system(format!(
        "{SYSTEM_PREAMBLE}\n\n<terminal-results>\n{rendered}</terminal-results>"
    ))
}

#[must_use]
pub fn user_request(request: &str, rendered: &str) -> Message {
    let request = request.trim();
    if request.is_empty() {
        Message::user(format!("Available commands:\n\n{rendered}"))
    } else {
        Message::user(format!("{request}\n\nAvailable commands:\n\n{rendered}"))
    }
}

/// Messages carrying `rendered` results in the requested `mode`.
#[must_use]
pub fn build_messages(mode: PromptMode, rendered: &str, request: Option<&str>) -> Vec<Message> {
    match mode {
        PromptMode::SystemContext => {
            let mut messages = vec![system_context(rendered)];
            if let Some(request) = request.filter(|r| !r.trim().is_empty()) {
                messages.push(Message::user(request));
            }
            messages
        }
        PromptMode::UserRequest => vec![user_request(request.unwrap_or_default(), rendered)],
    }
}

#[cfg(test)]
mod tests {
    use termgate_llm::Role;

    use super::*;

    const RENDERED: &str = "✓ `git status` (3ms)\nexit code: 0\n";

    #[test]
    fn mode_parsing() {
        assert_eq!("system".parse::<PromptMode>(), Ok(PromptMode::SystemContext));
        assert_eq!(" USER ".parse::<PromptMode>(), Ok(PromptMode::UserRequest));
        assert!("assistant".parse::<PromptMode>().is_err());
        assert_eq!(PromptMode::UserRequest.to_string(), "user");
    }

    #[test]
    fn system_mode_prepends_results() {
        let messages = build_messages(PromptMode::SystemContext, RENDERED, Some("what changed?"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("<terminal-results>\n✓ `git status`"));
        assert_eq!(messages[1], Message::user("what changed?"));
    }

    #[test]
    fn system_mode_without_request() {
        let messages = build_messages(PromptMode::SystemContext, RENDERED, None);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn user_mode_appends_available_commands() {
        let messages = build_messages(PromptMode::UserRequest, RENDERED, Some("what changed?"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].content.starts_with("what changed?\n\nAvailable commands:\n\n✓"));
    }

    #[test]
    fn identical_results_in_both_modes() {
        let system = build_messages(PromptMode::SystemContext, RENDERED, None);
        let user = build_messages(PromptMode::UserRequest, RENDERED, None);
        assert!(system[0].content.contains(RENDERED));
        assert!(user[0].content.contains(RENDERED));
    }
}
