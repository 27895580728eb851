//! External generator process configuration and argument construction.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Efforts the generator CLI accepts for `--effort`.
pub const VALID_EFFORTS: &[&str] = &["low", "medium", "high"];

/// How to launch the line-oriented generator (the `claude` CLI by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Executable name or path.
    pub program: String,
    /// Working directory for the child; inherits ours when unset.
    pub working_dir: Option<PathBuf>,
    /// Environment variables removed before launch. `CLAUDECODE` makes the
    /// CLI refuse to start when we ourselves run inside a Claude session.
    pub strip_env: Vec<String>,
    pub print: bool,
    pub output_format: String,
    pub verbose: bool,
    pub include_partial_messages: bool,
    pub dangerously_skip_permissions: bool,
    pub model: Option<String>,
    pub effort: Option<String>,
    pub max_budget_usd: Option<f64>,
    pub system_prompt: Option<String>,
    pub no_session_persistence: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            program: "claude".into(),
            working_dir: None,
            strip_env: vec!["CLAUDECODE".into()],
            print: true,
            output_format: "stream-json".into(),
            verbose: true,
            include_partial_messages: true,
            dangerously_skip_permissions: true,
            model: Some("haiku".into()),
            effort: None,
            max_budget_usd: None,
            system_prompt: None,
            no_session_persistence: false,
        }
    }
}

impl GeneratorConfig {
    /// Build the argument vector for one prompt.
    pub fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        if self.print {
            args.push("-p".into());
            args.push(prompt.into());
        }

        if !self.output_format.is_empty() {
            args.push("--output-format".into());
            args.push(self.output_format.clone());
        }

        if self.verbose {
            args.push("--verbose".into());
        }

        if let Some(ref model) = self.model {
            args.push("--model".into());
            args.push(model.clone());
        }

        if self.include_partial_messages {
            args.push("--include-partial-messages".into());
        }

        if self.dangerously_skip_permissions {
            args.push("--dangerously-skip-permissions".into());
        }

        if let Some(ref effort) = self.effort {
            args.push("--effort".into());
            args.push(effort.clone());
        }

        if let Some(budget) = self.max_budget_usd {
            args.push("--max-budget-usd".into());
            args.push(budget.to_string());
        }

        if let Some(ref system_prompt) = self.system_prompt {
            args.push("--system-prompt".into());
            args.push(system_prompt.clone());
        }

        if self.no_session_persistence {
            args.push("--no-session-persistence".into());
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_match_stream_json_invocation() {
        let args = GeneratorConfig::default().build_args("hello there");
        assert_eq!(
            args,
            vec![
                "-p",
                "hello there",
                "--output-format",
                "stream-json",
                "--verbose",
                "--model",
                "haiku",
                "--include-partial-messages",
                "--dangerously-skip-permissions",
            ]
        );
    }

    #[test]
    fn optional_flags_are_appended_in_order() {
        let config = GeneratorConfig {
            effort: Some("high".into()),
            max_budget_usd: Some(0.5),
            system_prompt: Some("be brief".into()),
            no_session_persistence: true,
            ..GeneratorConfig::default()
        };
        let args = config.build_args("q");
        let tail: Vec<&str> = args.iter().skip(9).map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--effort",
                "high",
                "--max-budget-usd",
                "0.5",
                "--system-prompt",
                "be brief",
                "--no-session-persistence",
            ]
        );
    }

    #[test]
    fn prompt_is_omitted_without_print() {
        let config = GeneratorConfig {
            print: false,
            verbose: false,
            model: None,
            include_partial_messages: false,
            dangerously_skip_permissions: false,
            ..GeneratorConfig::default()
        };
        assert_eq!(
            config.build_args("ignored"),
            vec!["--output-format", "stream-json"]
        );
    }

    #[test]
    fn prompt_is_a_single_argument() {
        let args = GeneratorConfig::default().build_args("two words; rm -rf /");
        assert_eq!(args[1], "two words; rm -rf /");
    }
}
