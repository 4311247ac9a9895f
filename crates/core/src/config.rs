//! TOML-based configuration for scmbridge.
//!
//! Configuration is optional: a checkout without a `.scmbridge.toml` at its
//! root runs with [`ScmConfig::default`]. Tool names can be overridden from
//! the environment via [`ScmConfig::apply_env_overrides`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Name of the per-checkout configuration file.
pub const CONFIG_FILE_NAME: &str = ".scmbridge.toml";

/// Upper bound for `patch.fuzz`.
pub const MAX_FUZZ: usize = 10;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScmConfig {
    /// External tool locations.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Subversion-specific settings.
    #[serde(default)]
    pub svn: SvnConfig,

    /// Patch application settings.
    #[serde(default)]
    pub patch: PatchConfig,
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Program names (or absolute paths) of the VCS tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolsConfig {
    #[serde(default = "default_svn_bin")]
    pub svn: String,

    #[serde(default = "default_git_bin")]
    pub git: String,
}

fn default_svn_bin() -> String {
    "svn".into()
}
fn default_git_bin() -> String {
    "git".into()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            svn: default_svn_bin(),
            git: default_git_bin(),
        }
    }
}

// ---------------------------------------------------------------------------
// SVN
// ---------------------------------------------------------------------------

/// Settings for the Subversion backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SvnConfig {
    /// Realm string looked for in the local credential store.
    #[serde(default = "default_server_realm")]
    pub server_realm: String,

    /// Script (relative to the checkout root) that produces the patch for
    /// local changes. Falls back to `svn diff` when unset or missing.
    #[serde(default)]
    pub create_patch_script: Option<PathBuf>,
}

fn default_server_realm() -> String {
    "<http://svn.webkit.org:80> Mac OS Forge".into()
}

impl Default for SvnConfig {
    fn default() -> Self {
        Self {
            server_realm: default_server_realm(),
            create_patch_script: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// Patch application settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchConfig {
    /// Context lines that may be ignored at each end of a hunk.
    #[serde(default = "default_fuzz")]
    pub fuzz: usize,

    /// File basenames merged as structured change logs.
    #[serde(default = "default_changelog_names")]
    pub changelog_names: Vec<String>,
}

fn default_fuzz() -> usize {
    3
}
fn default_changelog_names() -> Vec<String> {
    vec!["ChangeLog".into()]
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            fuzz: default_fuzz(),
            changelog_names: default_changelog_names(),
        }
    }
}

impl PatchConfig {
    /// Whether `path` names a structured change log.
    pub fn is_changelog(&self, path: &str) -> bool {
        let basename = path.rsplit('/').next().unwrap_or(path);
        self.changelog_names.iter().any(|name| name == basename)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ScmConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: ScmConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Configuration for a checkout: `<root>/.scmbridge.toml` if present,
    /// otherwise defaults. Environment overrides are applied either way.
    pub fn discover(checkout_root: &Path) -> Result<Self, ConfigError> {
        let candidate = checkout_root.join(CONFIG_FILE_NAME);
        let mut config = if candidate.is_file() {
            Self::load_from_file(&candidate)?
        } else {
            debug!(root = %checkout_root.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Replace tool names with `SCMBRIDGE_SVN` / `SCMBRIDGE_GIT` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(svn) = non_empty_env("SCMBRIDGE_SVN") {
            debug!(svn = %svn, "svn binary overridden from environment");
            self.tools.svn = svn;
        }
        if let Some(git) = non_empty_env("SCMBRIDGE_GIT") {
            debug!(git = %git, "git binary overridden from environment");
            self.tools.git = git;
        }
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tools.svn.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tools.svn".into(),
                detail: "svn program must not be empty".into(),
            });
        }
        if self.tools.git.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tools.git".into(),
                detail: "git program must not be empty".into(),
            });
        }
        if self.patch.fuzz > MAX_FUZZ {
            return Err(ConfigError::InvalidValue {
                field: "patch.fuzz".into(),
                detail: format!("fuzz must be at most {}", MAX_FUZZ),
            });
        }
        if self.patch.changelog_names.iter().any(|n| n.is_empty() || n.contains('/')) {
            return Err(ConfigError::InvalidValue {
                field: "patch.changelog_names".into(),
                detail: "entries must be bare file names".into(),
            });
        }
        if let Some(script) = &self.svn.create_patch_script {
            if script.is_absolute() {
                return Err(ConfigError::InvalidValue {
                    field: "svn.create_patch_script".into(),
                    detail: "path must be relative to the checkout root".into(),
                });
            }
        }
        Ok(())
    }

    /// Convenience: load, apply overrides, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Commented template written by `scmbridge init`.
    pub fn default_template() -> &'static str {
        r#"# scmbridge configuration
# Place this file at the root of a checkout as .scmbridge.toml.

[tools]
# Program names or absolute paths. SCMBRIDGE_SVN / SCMBRIDGE_GIT override these.
svn = "svn"
git = "git"

[svn]
# Realm looked for under ~/.subversion to decide whether credentials are stored.
server_realm = "<http://svn.webkit.org:80> Mac OS Forge"
# Script run from the checkout root to produce a patch of local changes.
# create_patch_script = "Tools/Scripts/svn-create-patch"

[patch]
# Context lines that may be ignored at each end of a hunk.
fuzz = 3
# File names merged as newest-first change logs.
changelog_names = ["ChangeLog"]
"#
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[tools]
svn = "/opt/svn/bin/svn"
git = "git"

[svn]
server_realm = "<https://svn.example.com:443> Example"
create_patch_script = "Tools/Scripts/svn-create-patch"

[patch]
fuzz = 2
changelog_names = ["ChangeLog", "NEWS"]
"#
    }

    #[test]
    fn test_parse_sample_config() {
        let config: ScmConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.tools.svn, "/opt/svn/bin/svn");
        assert_eq!(config.svn.server_realm, "<https://svn.example.com:443> Example");
        assert_eq!(
            config.svn.create_patch_script.as_deref(),
            Some(Path::new("Tools/Scripts/svn-create-patch"))
        );
        assert_eq!(config.patch.fuzz, 2);
        assert!(config.patch.is_changelog("NEWS"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ScmConfig = toml::from_str("").unwrap();
        assert_eq!(config, ScmConfig::default());
        assert_eq!(config.tools.git, "git");
        assert_eq!(config.patch.fuzz, 3);
        assert!(config.patch.is_changelog("WebCore/ChangeLog"));
        assert!(!config.patch.is_changelog("WebCore/ChangeLog.txt"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ScmConfig::default();
        config.patch.fuzz = MAX_FUZZ + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "patch.fuzz"
        ));

        let mut config = ScmConfig::default();
        config.tools.svn = " ".into();
        assert!(config.validate().is_err());

        let mut config = ScmConfig::default();
        config.patch.changelog_names = vec!["dir/ChangeLog".into()];
        assert!(config.validate().is_err());

        let mut config = ScmConfig::default();
        config.svn.create_patch_script = Some(PathBuf::from("/usr/bin/svn-create-patch"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ScmConfig::load_from_file(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::FileNotFound(_))));

        // No config file: defaults.
        let config = ScmConfig::discover(dir.path()).unwrap();
        assert_eq!(config.patch, PatchConfig::default());

        let mut file = std::fs::File::create(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        file.write_all(sample_toml().as_bytes()).unwrap();
        let config = ScmConfig::discover(dir.path()).unwrap();
        assert_eq!(config.patch.fuzz, 2);
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[patch\nfuzz = ").unwrap();
        assert!(matches!(
            ScmConfig::load_from_file(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_default_template_parses() {
        let config: ScmConfig = toml::from_str(ScmConfig::default_template())
            .expect("template must be valid toml");
        assert!(config.validate().is_ok());
        assert_eq!(config.patch.changelog_names, vec!["ChangeLog".to_string()]);
    }
}
