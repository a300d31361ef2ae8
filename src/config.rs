//! Run configuration.
//!
//! Values come from layers merged highest-precedence first: command line
//! (which already folds in environment variables), an optional
//! `apkweave.toml`, then built-in defaults. The library never looks at the
//! environment itself; callers hand it a finished [`PipelineConfig`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::Toolchain;

/// Config file looked up in the current directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "apkweave.toml";

pub const DEFAULT_WORKSPACE: &str = "build";
pub const DEFAULT_TOOLS_DIR: &str = "tools";
pub const DEFAULT_KEY_STORE: &str = "test_key_store.jks";
pub const DEFAULT_KEY_STORE_PASSWORD: &str = "password";
pub const DEFAULT_KEY_STORE_ALIAS: &str = "test_alias";

/// Fixed tool flags. Overridable from the config file, not the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    /// `dx --min-sdk-version`.
    pub min_sdk_version: u32,
    /// `zipalign` boundary in bytes.
    pub alignment: u32,
    /// `ajc -source` / `-target`.
    pub java_level: String,
    /// `jarsigner -sigalg`.
    pub signature_algorithm: String,
    /// `jarsigner -digestalg`.
    pub digest_algorithm: String,
    /// `jarsigner -tsa`; `None` signs without a timestamp.
    pub timestamp_authority: Option<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            min_sdk_version: 28,
            alignment: 4,
            java_level: "1.9".to_string(),
            signature_algorithm: "SHA1withRSA".to_string(),
            digest_algorithm: "SHA1".to_string(),
            timestamp_authority: Some("http://timestamp.comodoca.com/rfc3161".to_string()),
        }
    }
}

/// Credentials passed through to `jarsigner` untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningConfig {
    pub key_store: PathBuf,
    pub store_password: String,
    pub alias: String,
    pub alias_password: Option<String>,
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("key_store", &self.key_store)
            .field("store_password", &"<redacted>")
            .field("alias", &self.alias)
            .field("alias_password", &self.alias_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything one pipeline run needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_apk: PathBuf,
    pub recipe_dir: PathBuf,
    pub workspace_root: PathBuf,
    /// Where to copy the final APK; `None` leaves it in `<workspace>/output`.
    pub output: Option<PathBuf>,
    pub toolchain: Toolchain,
    pub signing: SigningConfig,
    pub settings: BuildSettings,
}

/// One layer of optional settings. Earlier layers win in [`ConfigLayer::merge`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    pub java_home: Option<PathBuf>,
    pub android_sdk: Option<PathBuf>,
    pub tools_dir: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub key_store: Option<PathBuf>,
    pub key_store_password: Option<String>,
    pub key_store_alias: Option<String>,
    pub key_store_alias_password: Option<String>,
    pub min_sdk_version: Option<u32>,
    pub alignment: Option<u32>,
    pub java_level: Option<String>,
    pub signature_algorithm: Option<String>,
    pub digest_algorithm: Option<String>,
    pub timestamp_authority: Option<String>,
}

impl ConfigLayer {
    /// Fill every unset field of `self` from `lower`.
    pub fn merge(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            java_home: self.java_home.or(lower.java_home),
            android_sdk: self.android_sdk.or(lower.android_sdk),
            tools_dir: self.tools_dir.or(lower.tools_dir),
            workspace: self.workspace.or(lower.workspace),
            output: self.output.or(lower.output),
            key_store: self.key_store.or(lower.key_store),
            key_store_password: self.key_store_password.or(lower.key_store_password),
            key_store_alias: self.key_store_alias.or(lower.key_store_alias),
            key_store_alias_password: self
                .key_store_alias_password
                .or(lower.key_store_alias_password),
            min_sdk_version: self.min_sdk_version.or(lower.min_sdk_version),
            alignment: self.alignment.or(lower.alignment),
            java_level: self.java_level.or(lower.java_level),
            signature_algorithm: self.signature_algorithm.or(lower.signature_algorithm),
            digest_algorithm: self.digest_algorithm.or(lower.digest_algorithm),
            timestamp_authority: self.timestamp_authority.or(lower.timestamp_authority),
        }
    }

    /// Built-in defaults for everything that has one.
    pub fn defaults() -> ConfigLayer {
        ConfigLayer {
            tools_dir: Some(PathBuf::from(DEFAULT_TOOLS_DIR)),
            workspace: Some(PathBuf::from(DEFAULT_WORKSPACE)),
            key_store: Some(PathBuf::from(DEFAULT_KEY_STORE)),
            key_store_password: Some(DEFAULT_KEY_STORE_PASSWORD.to_string()),
            key_store_alias: Some(DEFAULT_KEY_STORE_ALIAS.to_string()),
            key_store_alias_password: Some(DEFAULT_KEY_STORE_PASSWORD.to_string()),
            ..ConfigLayer::default()
        }
    }

    /// Turn the merged layer into a run configuration.
    pub fn finish(self, input_apk: PathBuf, recipe_dir: PathBuf) -> Result<PipelineConfig> {
        let defaults = BuildSettings::default();
        let Some(java_home) = self.java_home else {
            bail!("no JDK configured; pass -java-home or set JAVA_HOME");
        };
        let Some(android_sdk) = self.android_sdk else {
            bail!("no Android SDK configured; pass -android-sdk or set ANDROID_HOME");
        };

        let alignment = self.alignment.unwrap_or(defaults.alignment);
        if alignment == 0 {
            bail!("zipalign alignment must be positive");
        }

        // An empty TSA string in the config file turns timestamping off.
        let timestamp_authority = match self.timestamp_authority {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url),
            None => defaults.timestamp_authority,
        };

        Ok(PipelineConfig {
            input_apk,
            recipe_dir,
            workspace_root: self
                .workspace
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE)),
            output: self.output,
            toolchain: Toolchain::new(
                java_home,
                android_sdk,
                self.tools_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TOOLS_DIR)),
            ),
            signing: SigningConfig {
                key_store: self
                    .key_store
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_STORE)),
                store_password: self
                    .key_store_password
                    .unwrap_or_else(|| DEFAULT_KEY_STORE_PASSWORD.to_string()),
                alias: self
                    .key_store_alias
                    .unwrap_or_else(|| DEFAULT_KEY_STORE_ALIAS.to_string()),
                alias_password: self.key_store_alias_password,
            },
            settings: BuildSettings {
                min_sdk_version: self.min_sdk_version.unwrap_or(defaults.min_sdk_version),
                alignment,
                java_level: self.java_level.unwrap_or(defaults.java_level),
                signature_algorithm: self
                    .signature_algorithm
                    .unwrap_or(defaults.signature_algorithm),
                digest_algorithm: self.digest_algorithm.unwrap_or(defaults.digest_algorithm),
                timestamp_authority,
            },
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    #[serde(default)]
    toolchain: ToolchainToml,
    #[serde(default)]
    signing: SigningToml,
    #[serde(default)]
    build: BuildToml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolchainToml {
    java_home: Option<PathBuf>,
    android_sdk: Option<PathBuf>,
    tools_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SigningToml {
    key_store: Option<PathBuf>,
    key_store_password: Option<String>,
    key_store_alias: Option<String>,
    key_store_alias_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    workspace: Option<PathBuf>,
    output: Option<PathBuf>,
    min_sdk_version: Option<u32>,
    zipalign_alignment: Option<u32>,
    java_level: Option<String>,
    signature_algorithm: Option<String>,
    digest_algorithm: Option<String>,
    timestamp_authority: Option<String>,
}

/// Parse a config file. Relative paths inside it resolve against its directory.
pub fn load_config_file(path: &Path) -> Result<ConfigLayer> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config '{}'", path.display()))?;
    let parsed: ConfigToml =
        toml::from_str(&text).with_context(|| format!("parsing config '{}'", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let rel = |p: Option<PathBuf>| p.map(|p| resolve_relative(base, p));

    Ok(ConfigLayer {
        java_home: rel(parsed.toolchain.java_home),
        android_sdk: rel(parsed.toolchain.android_sdk),
        tools_dir: rel(parsed.toolchain.tools_dir),
        workspace: rel(parsed.build.workspace),
        output: rel(parsed.build.output),
        key_store: rel(parsed.signing.key_store),
        key_store_password: parsed.signing.key_store_password,
        key_store_alias: parsed.signing.key_store_alias,
        key_store_alias_password: parsed.signing.key_store_alias_password,
        min_sdk_version: parsed.build.min_sdk_version,
        alignment: parsed.build.zipalign_alignment,
        java_level: parsed.build.java_level,
        signature_algorithm: parsed.build.signature_algorithm,
        digest_algorithm: parsed.build.digest_algorithm,
        timestamp_authority: parsed.build.timestamp_authority,
    })
}

/// Load `explicit` if given, else `<dir>/apkweave.toml` if it exists.
pub fn discover_config_file(explicit: Option<&Path>, dir: &Path) -> Result<ConfigLayer> {
    if let Some(path) = explicit {
        return load_config_file(path);
    }
    let candidate = dir.join(DEFAULT_CONFIG_FILE);
    if candidate.is_file() {
        return load_config_file(&candidate);
    }
    Ok(ConfigLayer::default())
}

fn resolve_relative(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_roots() -> ConfigLayer {
        ConfigLayer {
            java_home: Some(PathBuf::from("/opt/jdk")),
            android_sdk: Some(PathBuf::from("/opt/android-sdk")),
            ..ConfigLayer::default()
        }
    }

    #[test]
    fn test_merge_prefers_higher_layer() {
        let cli = ConfigLayer {
            key_store_alias: Some("release".into()),
            ..ConfigLayer::default()
        };
        let file = ConfigLayer {
            key_store_alias: Some("from-file".into()),
            min_sdk_version: Some(24),
            ..ConfigLayer::default()
        };

        let merged = cli.merge(file);
        assert_eq!(merged.key_store_alias.as_deref(), Some("release"));
        assert_eq!(merged.min_sdk_version, Some(24));
    }

    #[test]
    fn test_finish_applies_defaults() {
        let config = with_roots()
            .merge(ConfigLayer::defaults())
            .finish("app.apk".into(), "recipe".into())
            .unwrap();

        assert_eq!(config.workspace_root, PathBuf::from("build"));
        assert_eq!(config.signing.alias, "test_alias");
        assert_eq!(config.settings, BuildSettings::default());
        assert_eq!(config.toolchain.tools_dir, PathBuf::from("tools"));
    }

    #[test]
    fn test_finish_requires_jdk_and_sdk() {
        let err = ConfigLayer::defaults()
            .finish("app.apk".into(), "recipe".into())
            .unwrap_err();
        assert!(err.to_string().contains("JAVA_HOME"));
    }

    #[test]
    fn test_empty_tsa_disables_timestamping() {
        let layer = ConfigLayer {
            timestamp_authority: Some(String::new()),
            ..with_roots()
        };
        let config = layer.finish("a.apk".into(), "r".into()).unwrap();
        assert!(config.settings.timestamp_authority.is_none());
    }

    #[test]
    fn test_load_config_file_resolves_relative_paths() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("apkweave.toml");
        fs::write(
            &path,
            r#"
[toolchain]
android_sdk = "sdk"
java_home = "/usr/lib/jvm/java-11"

[signing]
key_store = "keys/release.jks"
key_store_alias = "release"

[build]
min_sdk_version = 26
zipalign_alignment = 8
"#,
        )
        .unwrap();

        let layer = discover_config_file(None, temp.path()).unwrap();
        assert_eq!(layer.android_sdk, Some(temp.path().join("sdk")));
        assert_eq!(layer.java_home, Some(PathBuf::from("/usr/lib/jvm/java-11")));
        assert_eq!(layer.key_store, Some(temp.path().join("keys/release.jks")));
        assert_eq!(layer.min_sdk_version, Some(26));
        assert_eq!(layer.alignment, Some(8));
    }

    #[test]
    fn test_load_config_file_rejects_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        fs::write(&path, "[build]\nretries = 3\n").unwrap();

        assert!(load_config_file(&path).is_err());
    }

    #[test]
    fn test_missing_default_config_is_empty_layer() {
        let temp = TempDir::new().unwrap();
        let layer = discover_config_file(None, temp.path()).unwrap();
        assert_eq!(layer, ConfigLayer::default());
    }

    #[test]
    fn test_signing_debug_redacts_passwords() {
        let signing = SigningConfig {
            key_store: "k.jks".into(),
            store_password: "hunter2".into(),
            alias: "a".into(),
            alias_password: Some("hunter3".into()),
        };
        let rendered = format!("{:?}", signing);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("hunter3"));
    }
}
