use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TERMGATE_SHELL") {
            self.tools.shell.program = v;
        }
        if let Ok(v) = std::env::var("TERMGATE_TIMEOUT_MS") {
            match v.parse::<u64>() {
                Ok(ms) => self.tools.shell.timeout_ms = ms,
                Err(_) => tracing::warn!("ignoring invalid TERMGATE_TIMEOUT_MS value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("TERMGATE_MAX_OUTPUT_BYTES") {
            match v.parse::<usize>() {
                Ok(bytes) => self.tools.shell.max_output_bytes = bytes,
                Err(_) => tracing::warn!("ignoring invalid TERMGATE_MAX_OUTPUT_BYTES value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("TERMGATE_META_ROOT") {
            self.tools.meta.root = v;
        }
        if let Ok(v) = std::env::var("TERMGATE_AUDIT_DESTINATION") {
            self.tools.audit.enabled = true;
            self.tools.audit.destination = v;
        }
        if let Ok(v) = std::env::var("TERMGATE_PROMPT_MODE") {
            match v.parse() {
                Ok(mode) => self.prompt.mode = mode,
                Err(_) => tracing::warn!("ignoring invalid TERMGATE_PROMPT_MODE value: {v}"),
            }
        }
    }
}
