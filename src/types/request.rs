//! Run request types
//!
//! These mirror the options a client sends with a command. Field names are
//! camelCase on the wire.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Permission mode for tool execution inside the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Default mode - the CLI asks before running tools
    #[default]
    Default,
    /// Auto-approve file edits
    AcceptEdits,
    /// Planning mode - read-only operations
    Plan,
    /// Trust every tool (dangerous)
    BypassPermissions,
}

impl PermissionMode {
    /// Parse from the wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "acceptEdits" => Some(Self::AcceptEdits),
            "plan" => Some(Self::Plan),
            "bypassPermissions" => Some(Self::BypassPermissions),
            _ => None,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }

    /// Whether this mode trusts every tool without asking
    pub fn trusts_all_tools(&self) -> bool {
        matches!(self, Self::BypassPermissions)
    }
}

/// Tool allow/deny settings for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsSettings {
    /// Tools the CLI may run without asking
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Tools the user wants blocked
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    /// Trust every tool
    #[serde(default)]
    pub skip_permissions: bool,
}

/// An image attached to a command as an inline data URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    /// `data:<mime>;base64,<payload>`
    pub data: String,
    /// Declared MIME type, if the client sent one
    #[serde(default, alias = "type")]
    pub mime_type: Option<String>,
}

impl ImageAttachment {
    /// Create an attachment from a data URL
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: None,
        }
    }

    /// Set the declared MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Options recognised for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Session identifier; generated when absent
    #[serde(default)]
    pub session_id: Option<String>,
    /// Working directory; the current directory when absent
    #[serde(default, alias = "projectPath")]
    pub cwd: Option<PathBuf>,
    /// Resume the previous conversation in this directory
    #[serde(default)]
    pub resume: bool,
    /// Tool allow/deny settings
    #[serde(default)]
    pub tools_settings: ToolsSettings,
    /// Permission mode
    #[serde(default)]
    pub permission_mode: PermissionMode,
    /// Inline image attachments
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
}

/// A request to run one CLI command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Prompt text; may be empty
    #[serde(default)]
    pub command: String,
    /// Run options
    #[serde(default)]
    pub options: RunOptions,
}

impl RunRequest {
    /// Create a request for a prompt with default options
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            options: RunOptions::default(),
        }
    }

    /// Set the session identifier
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.options.session_id = Some(session_id.into());
        self
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.options.cwd = Some(cwd.into());
        self
    }

    /// Attach an image
    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.options.images.push(image);
        self
    }
}

/// Successful result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    /// Session the run was bound to
    pub session_id: String,
    /// Everything the CLI wrote to stdout
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_permission_mode_parse() {
        assert_eq!(
            PermissionMode::parse("bypassPermissions"),
            Some(PermissionMode::BypassPermissions)
        );
        assert_eq!(PermissionMode::parse("plan"), Some(PermissionMode::Plan));
        assert_eq!(PermissionMode::parse("yolo"), None);
        assert_eq!(PermissionMode::AcceptEdits.as_str(), "acceptEdits");
        assert!(PermissionMode::BypassPermissions.trusts_all_tools());
        assert!(!PermissionMode::Default.trusts_all_tools());
    }

    #[test]
    fn test_request_from_client_json() {
        let request: RunRequest = serde_json::from_value(json!({
            "command": "list files",
            "options": {
                "sessionId": "abc",
                "projectPath": "/tmp/proj",
                "resume": true,
                "toolsSettings": {
                    "allowedTools": ["fs_read"],
                    "skipPermissions": false
                },
                "permissionMode": "acceptEdits",
                "images": [{ "data": "data:image/png;base64,AAAA", "mimeType": "image/png" }]
            }
        }))
        .unwrap();

        assert_eq!(request.command, "list files");
        assert_eq!(request.options.session_id.as_deref(), Some("abc"));
        assert_eq!(request.options.cwd, Some(PathBuf::from("/tmp/proj")));
        assert!(request.options.resume);
        assert_eq!(request.options.tools_settings.allowed_tools, vec!["fs_read"]);
        assert!(request.options.tools_settings.disallowed_tools.is_empty());
        assert_eq!(request.options.permission_mode, PermissionMode::AcceptEdits);
        assert_eq!(
            request.options.images,
            vec![ImageAttachment::new("data:image/png;base64,AAAA").with_mime_type("image/png")]
        );
    }

    #[test]
    fn test_request_defaults() {
        let request: RunRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request, RunRequest::default());
        assert!(request.command.is_empty());
        assert!(request.options.images.is_empty());
    }
}
