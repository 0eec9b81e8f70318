//! Staging of inline image attachments
//!
//! The CLI only takes file paths, so each `data:<mime>;base64,<payload>` image
//! is decoded into a per-run directory under the working directory and the
//! paths are appended to the prompt. The directory belongs to the run and is
//! removed once the process exits.

use std::path::{Component, Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::types::{ImageAttachment, Result};

/// Extension used when the MIME type is missing or unknown
const FALLBACK_EXTENSION: &str = "png";

static DATA_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^data:([^;]+);base64,(.+)$").expect("Invalid regex"));

/// Split a data URL into (mime type, base64 payload)
pub fn parse_data_url(data: &str) -> Option<(&str, &str)> {
    let caps = DATA_URL.captures(data)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// File extension for an image MIME type
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "image/heic" => "heic",
        _ => FALLBACK_EXTENSION,
    }
}

/// MIME type for an image file extension
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

/// Read an image file into an inline data URL attachment
pub async fn load_image_file(path: &Path) -> Result<ImageAttachment> {
    let bytes = tokio::fs::read(path).await?;
    let mime = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(mime_for_extension)
        .unwrap_or("image/png");

    Ok(
        ImageAttachment::new(format!("data:{mime};base64,{}", STANDARD.encode(&bytes)))
            .with_mime_type(mime),
    )
}

/// Files staged for one run
#[derive(Debug, Default)]
pub struct StagedAttachments {
    dir: Option<PathBuf>,
    paths: Vec<PathBuf>,
}

impl StagedAttachments {
    /// Nothing staged
    pub fn none() -> Self {
        Self::default()
    }

    /// Decode `images` into a fresh directory under `cwd/staging_root`
    ///
    /// Malformed entries and write failures are logged and skipped; they
    /// never fail the run. Root and `..` components of `staging_root` are
    /// dropped, so the directory always lands under `cwd`.
    pub async fn stage(cwd: &Path, staging_root: &Path, images: &[ImageAttachment]) -> Self {
        if images.is_empty() {
            return Self::none();
        }

        let dir_name = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        );
        let root: PathBuf = staging_root
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        let dir = cwd.join(root).join(dir_name);

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(
                dir = %dir.display(),
                error = %e,
                "Failed to create attachment staging directory, continuing without images"
            );
            return Self::none();
        }

        // Owned from here on, so a dropped run still removes the directory
        let mut staged = Self {
            dir: Some(dir.clone()),
            paths: Vec::with_capacity(images.len()),
        };

        for (index, image) in images.iter().enumerate() {
            let Some((url_mime, payload)) = parse_data_url(&image.data) else {
                tracing::warn!(index, "Skipping image with invalid data format");
                continue;
            };

            let bytes = match STANDARD.decode(payload.trim()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping image with undecodable payload");
                    continue;
                }
            };

            let mime = image
                .mime_type
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(url_mime);
            let path = dir.join(format!("image_{index}.{}", extension_for_mime(mime)));

            match tokio::fs::write(&path, &bytes).await {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Staged image");
                    staged.paths.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to write image");
                }
            }
        }

        staged
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Append a note listing the staged paths to a non-empty prompt
    pub fn augment_prompt(&self, prompt: &str) -> String {
        if self.paths.is_empty() || prompt.is_empty() {
            return prompt.to_string();
        }

        let listing: Vec<String> = self
            .paths
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.display()))
            .collect();

        format!(
            "{prompt}\n\n[Images provided at the following paths:]\n{}",
            listing.join("\n")
        )
    }

    /// Remove the staging directory; failures are logged only
    pub async fn cleanup(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        let result = tokio::fs::remove_dir_all(&dir).await;
        log_removal(&dir, result);
    }
}

impl Drop for StagedAttachments {
    /// Blocking fallback for runs that never reached [`StagedAttachments::cleanup`]
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let result = std::fs::remove_dir_all(&dir);
            log_removal(&dir, result);
        }
    }
}

fn log_removal(dir: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::debug!(dir = %dir.display(), "Removed attachment staging directory"),
        Err(e) => tracing::warn!(
            dir = %dir.display(),
            error = %e,
            "Failed to remove attachment staging directory"
        ),
    }
}
