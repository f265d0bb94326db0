use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::RoutingSettings;

/// Load settings from a file using the config crate.
/// Supports JSON (the default), TOML and YAML.
pub async fn load_settings(settings_path: &str) -> Result<RoutingSettings> {
    load_settings_sync(settings_path)
}

/// Load settings synchronously
pub fn load_settings_sync(settings_path: &str) -> Result<RoutingSettings> {
    let settings_path = Path::new(settings_path);

    let format = match settings_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Json,
    };

    let raw = Config::builder()
        .add_source(File::new(
            settings_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", settings_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build settings from {}", settings_path.display()))?;

    let settings: RoutingSettings = raw.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize settings from {}",
            settings_path.display()
        )
    })?;

    Ok(settings)
}

/// Values supplied on the command line. `Some` wins over the settings file.
#[derive(Debug, Default, Clone)]
pub struct SettingsOverrides {
    pub verbose_logging: Option<bool>,
    pub proxy_port: Option<u16>,
    pub server_http_port: Option<u16>,
    pub server_https_port: Option<u16>,
    pub game_root_path: Option<String>,
    pub api_prefix: Option<String>,
    pub use_mad4fp: Option<bool>,
    pub legacy_go_port: Option<u16>,
    pub legacy_php_port: Option<u16>,
    pub legacy_php_path: Option<String>,
    pub legacy_use_php_server: Option<bool>,
    pub legacy_htdocs_path: Option<String>,
    pub php_cgi_path: Option<String>,
}

impl SettingsOverrides {
    /// Apply the overrides, then turn every filesystem path into an absolute one.
    pub fn apply(self, settings: &mut RoutingSettings) -> Result<()> {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    settings.$field = value;
                })*
            };
        }
        set!(
            verbose_logging,
            proxy_port,
            server_http_port,
            server_https_port,
            game_root_path,
            api_prefix,
            use_mad4fp,
            legacy_go_port,
            legacy_php_port,
            legacy_php_path,
            legacy_use_php_server,
            legacy_htdocs_path,
            php_cgi_path,
        );

        for path in [
            &mut settings.game_root_path,
            &mut settings.legacy_php_path,
            &mut settings.legacy_htdocs_path,
            &mut settings.php_cgi_path,
        ] {
            if path.is_empty() {
                continue;
            }
            let absolute = std::path::absolute(&*path)
                .with_context(|| format!("Failed to make path absolute: {path}"))?;
            *path = absolute.to_string_lossy().replace('\\', "/");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_json_settings() {
        let json_content = r#"
{
  "verboseLogging": true,
  "serverHTTPPort": 31001,
  "legacyPHPPort": 31600,
  "legacyUsePHPServer": true,
  "extMimeTypes": {
    "default": "application/octet-stream",
    "html": "text/html"
  }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let settings = load_settings(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert!(settings.verbose_logging);
        assert_eq!(settings.server_http_port, 31001);
        assert_eq!(settings.legacy_port(), 31600);
        assert_eq!(settings.ext_mime_types.get("html").unwrap(), "text/html");
        // untouched fields fall back to defaults
        assert_eq!(settings.proxy_port, 22500);
    }

    #[tokio::test]
    async fn test_load_toml_settings() {
        let toml_content = r#"
proxyPort = 40000
legacyUsePHPServer = false
legacyGoPort = 40001

[extMimeTypes]
default = "text/plain"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let settings = load_settings(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(settings.proxy_port, 40000);
        assert_eq!(settings.legacy_port(), 40001);
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let result = load_settings("/definitely/not/here/proxySettings.json").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_win_and_paths_become_absolute() {
        let mut settings = RoutingSettings::default();
        let overrides = SettingsOverrides {
            verbose_logging: Some(true),
            legacy_php_port: Some(23600),
            legacy_php_path: Some("legacy-root".to_string()),
            ..Default::default()
        };

        overrides.apply(&mut settings).unwrap();

        assert!(settings.verbose_logging);
        assert_eq!(settings.legacy_php_port, 23600);
        assert!(Path::new(&settings.legacy_php_path).is_absolute());
        assert!(settings.legacy_php_path.ends_with("legacy-root"));
        // not overridden
        assert_eq!(settings.server_http_port, 22501);
    }
}
