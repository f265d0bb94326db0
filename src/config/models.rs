//! Configuration data structures for fpgate.
//!
//! `RoutingSettings` maps directly onto the `proxySettings.json` file shared with the
//! archive server (also accepted as TOML / YAML). Field names keep the camelCase
//! spelling of that file so the same document can be used by every component.
//! Values are resolved once at startup and shared read-only behind an `Arc`.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Key of the mandatory fallback entry in the extension to MIME mapping.
pub const DEFAULT_MIME_KEY: &str = "default";

/// Which kind of legacy backend sits behind the fallback transport.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LegacyBackendKind {
    /// A PHP built-in server spawned and supervised by this process.
    ManagedProcess,
    /// A legacy server started and managed elsewhere.
    StandingService,
}

impl std::fmt::Display for LegacyBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacyBackendKind::ManagedProcess => f.write_str("managed-process"),
            LegacyBackendKind::StandingService => f.write_str("standing-service"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RoutingSettings {
    #[serde(rename = "allowCrossDomain")]
    pub allow_cross_domain: bool,
    /// Log every routed request at debug level and tag responses with their provenance.
    #[serde(rename = "verboseLogging")]
    pub verbose_logging: bool,
    /// Port the intercepting proxy front listens on.
    #[serde(rename = "proxyPort")]
    pub proxy_port: u16,
    /// Plain HTTP port of the archive server.
    #[serde(rename = "serverHTTPPort")]
    pub server_http_port: u16,
    /// Port of the archive server used for requests that arrived over TLS.
    #[serde(rename = "serverHTTPSPort")]
    pub server_https_port: u16,
    #[serde(rename = "gameRootPath")]
    pub game_root_path: String,
    #[serde(rename = "apiPrefix")]
    pub api_prefix: String,
    #[serde(rename = "externalFilePaths")]
    pub external_file_paths: Vec<String>,
    #[serde(rename = "extScriptTypes")]
    pub ext_script_types: Vec<String>,
    #[serde(rename = "extIndexTypes")]
    pub ext_index_types: Vec<String>,
    /// Lowercase extension (no leading dot) to MIME type, plus a `default` entry.
    #[serde(rename = "extMimeTypes")]
    pub ext_mime_types: HashMap<String, String>,
    #[serde(rename = "useMad4FP")]
    pub use_mad4fp: bool,
    #[serde(rename = "legacyGoPort")]
    pub legacy_go_port: u16,
    #[serde(rename = "legacyPHPPort")]
    pub legacy_php_port: u16,
    /// Directory holding the `php` interpreter and `router.php`.
    #[serde(rename = "legacyPHPPath")]
    pub legacy_php_path: String,
    #[serde(rename = "legacyUsePHPServer")]
    pub legacy_use_php_server: bool,
    #[serde(rename = "legacyHTDOCSPath")]
    pub legacy_htdocs_path: String,
    #[serde(rename = "legacyCGIBINPath")]
    pub legacy_cgibin_path: String,
    #[serde(rename = "phpCgiPath")]
    pub php_cgi_path: String,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        let ext_mime_types = [
            ("default", "application/octet-stream"),
            ("htm", "text/html"),
            ("html", "text/html"),
            ("txt", "text/plain"),
            ("css", "text/css"),
            ("js", "application/javascript"),
            ("json", "application/json"),
            ("xml", "text/xml"),
            ("swf", "application/x-shockwave-flash"),
            ("dcr", "application/x-director"),
            ("unity3d", "application/vnd.unity"),
            ("png", "image/png"),
            ("gif", "image/gif"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("mp3", "audio/mpeg"),
            ("mp4", "video/mp4"),
        ]
        .into_iter()
        .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
        .collect();

        Self {
            allow_cross_domain: false,
            verbose_logging: false,
            proxy_port: 22500,
            server_http_port: 22501,
            server_https_port: 22502,
            game_root_path: "./Data/Games".to_string(),
            api_prefix: "/fpProxy/api".to_string(),
            external_file_paths: Vec::new(),
            ext_script_types: vec!["php".to_string(), "cgi".to_string()],
            ext_index_types: vec!["html".to_string(), "htm".to_string()],
            ext_mime_types,
            use_mad4fp: false,
            legacy_go_port: 22601,
            legacy_php_port: 22600,
            legacy_php_path: "./Legacy".to_string(),
            legacy_use_php_server: true,
            legacy_htdocs_path: "./Legacy/htdocs".to_string(),
            legacy_cgibin_path: "./Legacy/cgi-bin".to_string(),
            php_cgi_path: "./Legacy/php-cgi".to_string(),
        }
    }
}

impl RoutingSettings {
    /// The legacy backend kind selected by `legacyUsePHPServer`.
    pub fn legacy_kind(&self) -> LegacyBackendKind {
        if self.legacy_use_php_server {
            LegacyBackendKind::ManagedProcess
        } else {
            LegacyBackendKind::StandingService
        }
    }

    /// Port every fallback request is pinned to.
    ///
    /// HTTP and TLS-intercepted traffic share this single target.
    pub fn legacy_port(&self) -> u16 {
        match self.legacy_kind() {
            LegacyBackendKind::ManagedProcess => self.legacy_php_port,
            LegacyBackendKind::StandingService => self.legacy_go_port,
        }
    }

    /// Archive server port for a request, chosen by whether it arrived over TLS.
    pub fn primary_port(&self, tls: bool) -> u16 {
        if tls {
            self.server_https_port
        } else {
            self.server_http_port
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_carry_default_mime() {
        let settings = RoutingSettings::default();
        assert!(settings.ext_mime_types.contains_key(DEFAULT_MIME_KEY));
        assert_eq!(settings.proxy_port, 22500);
    }

    #[test]
    fn test_legacy_port_follows_kind() {
        let mut settings = RoutingSettings::default();
        assert_eq!(settings.legacy_kind(), LegacyBackendKind::ManagedProcess);
        assert_eq!(settings.legacy_port(), 22600);

        settings.legacy_use_php_server = false;
        assert_eq!(settings.legacy_kind(), LegacyBackendKind::StandingService);
        assert_eq!(settings.legacy_port(), 22601);
    }

    #[test]
    fn test_primary_port_by_tls() {
        let settings = RoutingSettings::default();
        assert_eq!(settings.primary_port(false), 22501);
        assert_eq!(settings.primary_port(true), 22502);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let settings: RoutingSettings = serde_json::from_str(
            r#"{"serverHTTPPort": 30001, "extMimeTypes": {"default": "text/plain"}}"#,
        )
        .unwrap();
        assert_eq!(settings.server_http_port, 30001);
        assert_eq!(settings.server_https_port, 22502);
        assert_eq!(settings.ext_mime_types.len(), 1);
    }
}
