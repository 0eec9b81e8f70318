//! CLI invocation construction
//!
//! Builds the argument vector and environment for one `q chat` run. The
//! result is plain data so it can be inspected before anything is spawned.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::types::{RunOptions, SupervisorConfig};

/// Interactive chat subcommand
pub const CHAT_SUBCOMMAND: &str = "chat";
/// Verbosity flag, always passed
pub const VERBOSE_FLAG: &str = "--verbose";
/// Resume the previous conversation in the working directory
pub const RESUME_FLAG: &str = "--resume";
/// Trust every tool
pub const TRUST_ALL_TOOLS_FLAG: &str = "--trust-all-tools";
/// Trust a comma-separated list of tools
pub const TRUST_TOOLS_FLAG: &str = "--trust-tools";

/// Variables that keep ANSI colour codes out of captured output
pub const NO_COLOR_ENV: &[(&str, &str)] = &[
    ("NO_COLOR", "1"),
    ("FORCE_COLOR", "0"),
    ("CLICOLOR", "0"),
    ("TERM", "dumb"),
];

/// A fully resolved CLI invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Applied in order, later entries win
    pub env: Vec<(String, String)>,
}

impl CliInvocation {
    /// Build the invocation for `prompt` with `options`
    ///
    /// Argument order: subcommand, prompt (if non-empty), verbosity flag,
    /// then optional resume and tool-trust flags.
    pub fn build(
        config: &SupervisorConfig,
        prompt: &str,
        options: &RunOptions,
        cwd: &Path,
    ) -> Self {
        let mut args = vec![CHAT_SUBCOMMAND.to_string()];
        if !prompt.is_empty() {
            args.push(prompt.to_string());
        }
        args.push(VERBOSE_FLAG.to_string());

        if options.resume {
            args.push(RESUME_FLAG.to_string());
        }

        let tools = &options.tools_settings;
        if tools.skip_permissions || options.permission_mode.trusts_all_tools() {
            args.push(TRUST_ALL_TOOLS_FLAG.to_string());
        } else if !tools.allowed_tools.is_empty() {
            args.push(format!("{TRUST_TOOLS_FLAG}={}", tools.allowed_tools.join(",")));
        }

        if !tools.disallowed_tools.is_empty() {
            tracing::debug!(
                disallowed = ?tools.disallowed_tools,
                "CLI has no deny-list flag, disallowed tools are not forwarded"
            );
        }

        let mut extra: Vec<(String, String)> = config
            .extra_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        extra.sort();

        let env = extra
            .into_iter()
            .chain(
                NO_COLOR_ENV
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
            )
            .collect();

        Self {
            program: config.cli_path.clone(),
            args,
            cwd: cwd.to_path_buf(),
            env,
        }
    }

    /// Tokio command with piped stdout/stderr and no stdin
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Value of an environment override, last one wins
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PermissionMode, ToolsSettings};
    use pretty_assertions::assert_eq;

    fn build(prompt: &str, options: &RunOptions) -> CliInvocation {
        CliInvocation::build(
            &SupervisorConfig::default(),
            prompt,
            options,
            Path::new("/tmp/proj"),
        )
    }

    #[test]
    fn test_basic_argv() {
        let invocation = build("list files", &RunOptions::default());

        assert_eq!(invocation.program, "q");
        assert_eq!(invocation.args, vec!["chat", "list files", "--verbose"]);
        assert_eq!(invocation.cwd, PathBuf::from("/tmp/proj"));
    }

    #[test]
    fn test_empty_prompt_omitted() {
        let invocation = build("", &RunOptions::default());
        assert_eq!(invocation.args, vec!["chat", "--verbose"]);
    }

    #[test]
    fn test_color_disabled() {
        let config = SupervisorConfig::default().with_env("NO_COLOR", "0");
        let invocation =
            CliInvocation::build(&config, "x", &RunOptions::default(), Path::new("/tmp"));

        assert_eq!(invocation.env_value("NO_COLOR"), Some("1"));
        assert_eq!(invocation.env_value("FORCE_COLOR"), Some("0"));
        assert_eq!(invocation.env_value("TERM"), Some("dumb"));
    }

    #[test]
    fn test_extra_env_forwarded() {
        let config = SupervisorConfig::default().with_env("AWS_PROFILE", "dev");
        let invocation =
            CliInvocation::build(&config, "x", &RunOptions::default(), Path::new("/tmp"));
        assert_eq!(invocation.env_value("AWS_PROFILE"), Some("dev"));
    }

    #[test]
    fn test_resume_and_trust_flags() {
        let options = RunOptions {
            resume: true,
            tools_settings: ToolsSettings {
                allowed_tools: vec!["fs_read".to_string(), "execute_bash".to_string()],
                disallowed_tools: vec!["use_aws".to_string()],
                skip_permissions: false,
            },
            ..Default::default()
        };

        let invocation = build("go", &options);
        assert_eq!(
            invocation.args,
            vec![
                "chat",
                "go",
                "--verbose",
                "--resume",
                "--trust-tools=fs_read,execute_bash"
            ]
        );
    }

    #[test]
    fn test_bypass_trusts_everything() {
        let options = RunOptions {
            permission_mode: PermissionMode::BypassPermissions,
            tools_settings: ToolsSettings {
                allowed_tools: vec!["fs_read".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let invocation = build("go", &options);
        assert_eq!(invocation.args, vec!["chat", "go", "--verbose", "--trust-all-tools"]);

        let options = RunOptions {
            tools_settings: ToolsSettings {
                skip_permissions: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(build("go", &options).args.last().unwrap(), "--trust-all-tools");
    }
}
