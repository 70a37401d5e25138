use crate::config::helper::parse_duration_or;
use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    /// Append each publish to a file per label
    #[default]
    File,
    /// Accept and discard publishes
    None,
}

// YAML structure for the `upload:` section
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    #[serde(default)]
    pub kind: UploadKind,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout: Option<String>,
}

impl UploadConfig {
    pub fn timeout(&self) -> Result<Duration> {
        parse_duration_or(&self.timeout, DEFAULT_UPLOAD_TIMEOUT)
    }

    /// Target directory for the file store.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_capture_dir)
    }
}

fn default_capture_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("prompt-autopilot").join("captures"))
        .unwrap_or_else(|| PathBuf::from("captures"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.kind, UploadKind::File);
        assert_eq!(config.timeout().unwrap(), DEFAULT_UPLOAD_TIMEOUT);
        assert!(config.resolved_dir().ends_with("captures"));
    }

    #[test]
    fn test_upload_section() {
        let config: UploadConfig =
            serde_yaml::from_str("kind: none\ndir: /tmp/out\ntimeout: 3s").unwrap();
        assert_eq!(config.kind, UploadKind::None);
        assert_eq!(config.resolved_dir(), PathBuf::from("/tmp/out"));
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(3));
    }
}
