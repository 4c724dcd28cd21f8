//! Moves oversized user content and inline images out of the command line
//! into files.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use {
    base64::Engine,
    relaygate_config::UploadsConfig,
    sha2::{Digest, Sha256},
    tracing::{debug, warn},
};

use crate::error::RelayError;

/// Writes content above `threshold_chars` to `dir` and hands back an
/// `@path` reference the agent can read.
#[derive(Debug, Clone)]
pub struct ContentSpiller {
    dir: PathBuf,
    threshold_chars: usize,
}

impl ContentSpiller {
    pub fn new(dir: impl Into<PathBuf>, threshold_chars: usize) -> Self {
        Self {
            dir: dir.into(),
            threshold_chars,
        }
    }

    pub fn from_config(config: &UploadsConfig) -> Self {
        Self::new(config.dir.clone(), config.threshold_chars)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return `text` unchanged when short, otherwise the file reference.
    pub fn process(&self, text: &str) -> Result<String, RelayError> {
        if text.chars().count() <= self.threshold_chars {
            return Ok(text.to_string());
        }
        let (file_name, body) = split_file_name(text);
        let path = self.write(body, file_name)?;
        debug!(chars = body.chars().count(), path = %path.display(), "spilled large content");
        Ok(match file_name {
            Some(name) => format!("File '{name}': @{}", path.display()),
            None => format!("@{}", path.display()),
        })
    }

    /// Prompt text standing in for an image part.
    ///
    /// `data:` URLs are decoded into a file and referenced as `@path`;
    /// remote URLs are passed along as text. Failures become bracketed
    /// placeholders so the turn still runs.
    pub fn image_reference(&self, url: &str) -> String {
        if url.is_empty() {
            return "[Image - missing URL]".to_string();
        }
        if url.starts_with("data:") {
            return match self.save_image(url) {
                Ok(path) => {
                    debug!(path = %path.display(), "saved inline image");
                    format!("@{}", path.display())
                },
                Err(e) => {
                    warn!(error = %e, "failed to save inline image");
                    "[Image - failed to process]".to_string()
                },
            };
        }
        if url.starts_with("http") {
            return format!("[Image URL: {url}]");
        }
        "[Image - unsupported format]".to_string()
    }

    fn save_image(&self, data_url: &str) -> anyhow::Result<PathBuf> {
        let (header, encoded) = data_url
            .split_once(',')
            .ok_or_else(|| anyhow::anyhow!("data URL has no payload"))?;
        let mime = header
            .split(';')
            .next()
            .and_then(|m| m.strip_prefix("data:"))
            .unwrap_or_default();
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        let path = self
            .dir
            .join(format!("image_{}{}", short_hash(&bytes), image_extension(mime)));
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, &bytes)?;
        Ok(path)
    }

    fn write(&self, body: &str, file_name: Option<&str>) -> Result<PathBuf, RelayError> {
        fs::create_dir_all(&self.dir).map_err(RelayError::io(&self.dir))?;
        let ext = file_name
            .and_then(extension_of)
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_else(|| ".txt".to_string());
        let path = self
            .dir
            .join(format!("upload_{}{ext}", short_hash(body.as_bytes())));
        fs::write(&path, body).map_err(RelayError::io(&path))?;
        Ok(path)
    }
}

/// First 12 hex characters of the SHA-256 of `bytes`.
fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hash = String::with_capacity(12);
    for b in digest.iter().take(6) {
        let _ = write!(hash, "{b:02x}");
    }
    hash
}

fn image_extension(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/bmp" => ".bmp",
        _ => ".png",
    }
}

/// Usable extension: short and alphanumeric.
fn extension_of(name: &str) -> Option<&str> {
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 9 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
}

/// Detect a `name.ext` first line. Returns the name and the remaining body,
/// or `(None, text)` when the first line does not look like a file name.
fn split_file_name(text: &str) -> (Option<&str>, &str) {
    let Some((first, rest)) = text.split_once('\n') else {
        return (None, text);
    };
    let name = first.trim();
    if first.starts_with(' ') || name.len() >= 300 || extension_of(name).is_none() {
        return (None, text);
    }
    (Some(name), rest)
}
