//! Deny-first, allow-second command classification.
//!
//! Matching is textual. Pipes, chaining and substitution are not parsed, so an allowed
//! prefix followed by `; other-command` passes unless a deny pattern catches it.

use std::sync::{Arc, LazyLock};

use regex::{Regex, RegexBuilder};

use crate::config::ShellConfig;
use crate::error::ToolError;

pub const NOT_ALLOW_LISTED: &str = "not in allow-list";
pub const BLANK_COMMAND: &str = "empty command";

const BUILTIN_DENY: &[(&str, &str)] = &[
    (
        "recursive delete",
        r"\brm\s+(?:\S+\s+)*?(?:-[a-z]*r[a-z]*|--recursive)\b",
    ),
    (
        "privilege escalation",
        r"(?:^|[;&|(`\n])\s*(?:(?:env|command|exec|nohup|time|xargs)\s+(?:-\S+\s+|\w+=\S*\s+)*)?(?:sudo|su|doas|pkexec)(?:\s|$)",
    ),
    (
        "permission broadening",
        r"\bchmod\s+(?:-\S+\s+)*(?:0?777\b|0?666\b|[ugoa]*\+[rwxt]*[ws])|\bchown\s+(?:-\S+\s+)*root\b",
    ),
    (
        "download-then-execute",
        r#"\b(?:curl|wget|fetch)\b[^|]*\|\s*(?:sudo\s+)?(?:env\s+)?(?:ba|z|da|k|c|tc)?sh\b|\b(?:curl|wget)\b[^|]*\|\s*(?:python[0-9.]*|perl|ruby|node|php)\b|\b(?:ba|z)?sh\s+(?:-c\s+)?["']?\$\(\s*(?:curl|wget)|\b(?:ba|z)?sh\s+<\(\s*(?:curl|wget)"#,
    ),
    (
        "disk destruction",
        r"\bmkfs(?:\.\w+)?\b|\bwipefs\b|\bdd\s+[^\n]*\bof=/dev/|>\s*/dev/(?:sd[a-z]|nvme|hd[a-z]|disk)",
    ),
    ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    (
        "system power control",
        r"\b(?:shutdown|reboot|halt|poweroff)\b|\binit\s+[06]\b",
    ),
];

const BUILTIN_ALLOW: &[&str] = &[
    "git", "ls", "pwd", "cat", "head", "tail", "wc", "grep", "rg", "find", "which", "echo",
    "printf", "tree", "du", "df", "file", "stat", "date", "uname", "whoami", "sort", "uniq",
    "diff", "jq", "cargo", "rustc", "npm", "node", "python", "python3", "pip", "go", "make",
    "true", "false", "sleep",
];

static BUILTIN_DENY_RULES: LazyLock<Vec<DenyRule>> = LazyLock::new(|| {
    BUILTIN_DENY
        .iter()
        .map(|(label, pattern)| DenyRule::new(*label, pattern).unwrap())
        .collect()
});

/// Labelled, case-insensitive deny pattern.
#[derive(Debug, Clone)]
pub struct DenyRule {
    label: String,
    pattern: Regex,
}

impl DenyRule {
    /// # Errors
    ///
    /// Returns `ToolError::InvalidPattern` if `pattern` is not a valid regex.
    pub fn new(label: impl Into<String>, pattern: &str) -> Result<Self, ToolError> {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ToolError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })?;
        Ok(Self {
            label: label.into(),
            pattern: compiled,
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn is_match(&self, command: &str) -> bool {
        self.pattern.is_match(command)
    }
}

/// Ordered deny rules plus allow-prefixes. Read-only once built.
#[derive(Debug, Clone)]
pub struct PolicyRuleSet {
    deny: Vec<DenyRule>,
    allow_prefixes: Vec<String>,
}

impl PolicyRuleSet {
    /// # Errors
    ///
    /// Returns `ToolError::EmptyPrefix` if any allow-prefix is blank.
    pub fn new(deny: Vec<DenyRule>, allow_prefixes: Vec<String>) -> Result<Self, ToolError> {
        let mut prefixes = Vec::with_capacity(allow_prefixes.len());
        for prefix in allow_prefixes {
            let trimmed = prefix.trim();
            if trimmed.is_empty() {
                return Err(ToolError::EmptyPrefix);
            }
            if !prefixes.iter().any(|p: &String| p == trimmed) {
                prefixes.push(trimmed.to_owned());
            }
        }
        Ok(Self {
            deny,
            allow_prefixes: prefixes,
        })
    }

    /// Built-in deny patterns and allow-prefixes.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            deny: BUILTIN_DENY_RULES.clone(),
            allow_prefixes: BUILTIN_ALLOW.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    /// Built-ins extended with the patterns and prefixes from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an extra deny pattern does not compile or an extra prefix is blank.
    pub fn from_config(config: &ShellConfig) -> Result<Self, ToolError> {
        let mut deny = BUILTIN_DENY_RULES.clone();
        for pattern in &config.deny_patterns {
            deny.push(DenyRule::new(pattern.as_str(), pattern)?);
        }
        let allow = BUILTIN_ALLOW
            .iter()
            .map(|p| (*p).to_owned())
            .chain(config.allowed_prefixes.iter().cloned())
            .collect();
        Self::new(deny, allow)
    }

    #[must_use]
    pub fn deny_rules(&self) -> &[DenyRule] {
        &self.deny
    }

    #[must_use]
    pub fn allow_prefixes(&self) -> &[String] {
        &self.allow_prefixes
    }

    /// First deny rule matching the raw command text.
    #[must_use]
    pub fn first_denial(&self, command: &str) -> Option<&DenyRule> {
        self.deny.iter().find(|rule| rule.is_match(command))
    }

    /// Allow-prefix the command starts with, on a word boundary.
    #[must_use]
    pub fn allowing_prefix(&self, command: &str) -> Option<&str> {
        let trimmed = command.trim_start();
        self.allow_prefixes
            .iter()
            .find(|prefix| {
                trimmed.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                    rest.is_empty() || rest.starts_with(char::is_whitespace)
                })
            })
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked { reason: String },
}

impl Verdict {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Blocked { reason } => Some(reason),
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }
}

/// Classifies raw command text against a shared `PolicyRuleSet`.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    rules: Arc<PolicyRuleSet>,
}

impl CommandPolicy {
    #[must_use]
    pub fn new(rules: Arc<PolicyRuleSet>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &PolicyRuleSet {
        &self.rules
    }

    #[must_use]
    pub fn classify(&self, command: &str) -> Verdict {
        self.evaluate(command, false)
    }

    /// Classify with an explicit bypass. `skip_safety_check` skips both the deny scan and
    /// the allow-list; a blank command stays blocked either way.
    #[must_use]
    pub fn evaluate(&self, command: &str, skip_safety_check: bool) -> Verdict {
        if command.trim().is_empty() {
            return Verdict::blocked(BLANK_COMMAND);
        }
        if skip_safety_check {
            return Verdict::Allowed;
        }
        if let Some(rule) = self.rules.first_denial(command) {
            return Verdict::blocked(format!("matches deny pattern: {}", rule.label()));
        }
        if self.rules.allowing_prefix(command).is_none() {
            return Verdict::blocked(NOT_ALLOW_LISTED);
        }
        Verdict::Allowed
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(Arc::new(PolicyRuleSet::builtin()))
    }
}
