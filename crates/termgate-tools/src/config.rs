use serde::Deserialize;

fn default_program() -> String {
    "sh".into()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_output_bytes() -> usize {
    10_000
}

fn default_meta_root() -> String {
    ".".into()
}

fn default_preview_lines() -> usize {
    5
}

fn default_max_chars() -> usize {
    30_000
}

fn default_audit_destination() -> String {
    "stdout".into()
}

/// Top-level configuration for command execution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Shell-specific configuration: program, limits, and policy extensions.
///
/// `deny_patterns` and `allowed_prefixes` are appended to the built-in rule set,
/// never substituted for it.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    #[serde(default)]
    pub allowed_prefixes: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            deny_patterns: Vec::new(),
            allowed_prefixes: Vec::new(),
        }
    }
}

/// Context shared by meta-command expansions.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaConfig {
    #[serde(default = "default_meta_root")]
    pub root: String,
    #[serde(default = "default_preview_lines")]
    pub preview_lines: usize,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            root: default_meta_root(),
            preview_lines: default_preview_lines(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormatConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_audit_destination")]
    pub destination: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: default_audit_destination(),
        }
    }
}
