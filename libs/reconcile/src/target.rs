//! Declared file targets and their follow-up effects.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Permission bits applied to files and inline content when none are given.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Permission bits applied to directory targets when none are given.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Effects to trigger when a target's destination changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEffect {
    /// Services to restart.
    #[serde(default)]
    pub restart_services: Vec<String>,

    /// Whether the node must reboot.
    #[serde(default)]
    pub reboot: bool,
}

/// A managed file, directory tree or inline content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileTarget {
    /// Copy a single file from the config directory.
    #[serde(rename_all = "camelCase")]
    File {
        src_path: PathBuf,
        dest_path: PathBuf,
        #[serde(default, rename = "fileMod")]
        mode: String,
        #[serde(default, rename = "syncBehavior")]
        sync: Option<SyncEffect>,
    },

    /// Mirror a directory tree from the config directory.
    #[serde(rename_all = "camelCase")]
    Directory {
        src_path: PathBuf,
        dest_path: PathBuf,
        #[serde(default, rename = "fileMod")]
        mode: String,
        #[serde(default, rename = "syncBehavior")]
        sync: Option<SyncEffect>,
    },

    /// Write literal content.
    #[serde(rename_all = "camelCase")]
    Content {
        content: String,
        dest_path: PathBuf,
        #[serde(default, rename = "fileMod")]
        mode: String,
        #[serde(default, rename = "syncBehavior")]
        sync: Option<SyncEffect>,
    },
}

impl FileTarget {
    /// Destination path on this node.
    pub fn dest_path(&self) -> &Path {
        match self {
            Self::File { dest_path, .. }
            | Self::Directory { dest_path, .. }
            | Self::Content { dest_path, .. } => dest_path,
        }
    }

    /// Source path inside the config directory, if the variant has one.
    pub fn src_path(&self) -> Option<&Path> {
        match self {
            Self::File { src_path, .. } | Self::Directory { src_path, .. } => Some(src_path),
            Self::Content { .. } => None,
        }
    }

    /// Effect attached to this target.
    pub fn sync_effect(&self) -> Option<&SyncEffect> {
        match self {
            Self::File { sync, .. } | Self::Directory { sync, .. } | Self::Content { sync, .. } => {
                sync.as_ref()
            }
        }
    }

    /// Permission bits to apply, falling back to the variant default.
    pub fn mode(&self) -> u32 {
        match self {
            Self::File { mode, .. } | Self::Content { mode, .. } => {
                parse_mode(mode, DEFAULT_FILE_MODE)
            }
            Self::Directory { mode, .. } => parse_mode(mode, DEFAULT_DIR_MODE),
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Directory { .. } => "directory",
            Self::Content { .. } => "content",
        }
    }
}

/// Parse an octal mode string such as `"755"`.
///
/// An empty string yields `default`. Strings that are not plain base-8 digits
/// (a leading sign counts as invalid) or exceed `0o7777` log a warning and
/// also yield `default`.
pub fn parse_mode(raw: &str, default: u32) -> u32 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default;
    }

    let digits = trimmed.bytes().all(|b| b.is_ascii_digit());
    match u32::from_str_radix(trimmed, 8) {
        Ok(bits) if digits && bits <= 0o7777 => bits,
        _ => {
            warn!(
                mode = raw,
                default = %format!("{default:o}"),
                "Invalid file mode, using default"
            );
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", DEFAULT_FILE_MODE, 0o644)]
    #[case("", DEFAULT_DIR_MODE, 0o755)]
    #[case("755", DEFAULT_FILE_MODE, 0o755)]
    #[case("0600", DEFAULT_FILE_MODE, 0o600)]
    #[case("abc", DEFAULT_FILE_MODE, 0o644)]
    #[case("789", DEFAULT_DIR_MODE, 0o755)]
    #[case("77777", DEFAULT_FILE_MODE, 0o644)]
    #[case("+755", DEFAULT_FILE_MODE, 0o644)]
    fn test_parse_mode(#[case] raw: &str, #[case] default: u32, #[case] expected: u32) {
        assert_eq!(parse_mode(raw, default), expected);
    }

    #[test]
    fn test_target_mode_defaults_per_variant() {
        let file = FileTarget::File {
            src_path: "a".into(),
            dest_path: "/tmp/a".into(),
            mode: String::new(),
            sync: None,
        };
        let dir = FileTarget::Directory {
            src_path: "d".into(),
            dest_path: "/tmp/d".into(),
            mode: String::new(),
            sync: None,
        };

        assert_eq!(file.mode(), 0o644);
        assert_eq!(dir.mode(), 0o755);
    }

    #[test]
    fn test_deserialize_tagged_targets() {
        let yaml = r#"
- type: file
  srcPath: etc/app.conf
  destPath: /etc/app.conf
  fileMod: "600"
  syncBehavior:
    restartServices: [app]
- type: content
  content: "hello\n"
  destPath: /etc/motd
- type: directory
  srcPath: etc/app.d
  destPath: /etc/app.d
  syncBehavior:
    reboot: true
"#;
        let targets: Vec<FileTarget> = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].kind(), "file");
        assert_eq!(targets[0].mode(), 0o600);
        assert_eq!(
            targets[0].sync_effect().unwrap().restart_services,
            vec!["app".to_string()]
        );
        assert_eq!(targets[1].src_path(), None);
        assert_eq!(targets[1].dest_path(), Path::new("/etc/motd"));
        assert!(targets[2].sync_effect().unwrap().reboot);
    }

    #[test]
    fn test_unknown_target_type_rejected() {
        let yaml = r#"
- type: symlink
  destPath: /etc/link
"#;
        let result: Result<Vec<FileTarget>, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }
}
