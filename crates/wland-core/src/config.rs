use crate::runtime_dir;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const WEBHOOK_URL_ENV: &str = "WLAND_CHAT_WEBHOOK_URL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Stream when the response looks incrementally readable.
    #[default]
    Auto,
    Stream,
    Buffered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub auth_token: Option<String>,
    /// Environment variable consulted before `auth_token`.
    pub auth_token_env: String,
    pub timeout_seconds: u64,
    pub transport: TransportMode,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            auth_token_env: "WLAND_CHAT_AUTH_TOKEN".to_string(),
            timeout_seconds: 30,
            transport: TransportMode::Auto,
        }
    }
}

impl WebhookConfig {
    pub fn resolve_url(&self) -> Option<String> {
        std::env::var(WEBHOOK_URL_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| {
                let url = self.url.trim();
                (!url.is_empty()).then(|| url.to_string())
            })
    }

    pub fn resolve_auth_token(&self) -> Option<String> {
        std::env::var(&self.auth_token_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| {
                self.auth_token
                    .as_ref()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
    }
}

/// Pacing of the synthetic typing effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    pub char_delay_ms: u64,
    pub jitter_min: f64,
    pub jitter_max: f64,
    /// Extra pause after `.`, `!`, `?` and newlines.
    pub sentence_pause_ms: u64,
    /// Extra pause after `,`, `;` and `:`.
    pub clause_pause_ms: u64,
    pub words_per_minute: u32,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            char_delay_ms: 30,
            jitter_min: 0.7,
            jitter_max: 1.3,
            sentence_pause_ms: 150,
            clause_pause_ms: 70,
            words_per_minute: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GdprConfig {
    pub enabled: bool,
    pub title: String,
    pub message: String,
    pub accept_label: String,
    pub decline_label: String,
}

impl Default for GdprConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            title: "Privacy notice".to_string(),
            message: "Messages you send are processed by an external service to generate replies."
                .to_string(),
            accept_label: "Accept".to_string(),
            decline_label: "Decline".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationKind {
    #[default]
    Modal,
    Fullscreen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    pub presentation: PresentationKind,
    pub start_minimized_after_interaction: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            presentation: PresentationKind::Modal,
            start_minimized_after_interaction: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// `{seconds}` is replaced by the remaining whole seconds.
    pub notice_template: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            notice_template: "Redirecting in {seconds} seconds...".to_string(),
        }
    }
}

impl RedirectConfig {
    pub fn notice(&self, seconds: u64) -> String {
        self.notice_template
            .replace("{seconds}", &seconds.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub verbose: bool,
    pub file_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            file_name: "chat.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub webhook: WebhookConfig,
    pub typing: TypingConfig,
    pub gdpr: GdprConfig,
    pub widget: WidgetConfig,
    pub redirect: RedirectConfig,
    pub log: LogConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".wland-chat/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Defaults, then legacy TOML, then user, project and local JSON layers.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let legacy = Self::legacy_toml_path(workspace);
        if legacy.exists() {
            let raw = fs::read_to_string(legacy)?;
            let legacy_cfg: AppConfig = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_cfg)?);
        }

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn ensure(workspace: &Path) -> Result<Self> {
        let path = Self::project_settings_path(workspace);
        if path.exists()
            || Self::project_local_settings_path(workspace).exists()
            || Self::legacy_toml_path(workspace).exists()
            || Self::user_settings_path().is_some_and(|p| p.exists())
        {
            return Self::load(workspace);
        }
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #[test]
        fn merge_json_value_is_idempotent_for_flat_objects(
            base in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
            overlay in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
        ) {
            let mut base_value = json!(base);
            let overlay_value = json!(overlay);
            merge_json_value(&mut base_value, &overlay_value);
            let once = base_value.clone();
            merge_json_value(&mut base_value, &overlay_value);
            prop_assert_eq!(base_value, once);
        }
    }

    #[test]
    fn project_settings_override_defaults_per_field() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let dir = runtime_dir(workspace.path());
        fs::create_dir_all(&dir).expect("runtime dir");
        fs::write(
            dir.join("settings.json"),
            r#"{"webhook":{"url":"https://n8n.example/webhook/chat"},"typing":{"char_delay_ms":5}}"#,
        )
        .expect("settings");

        let cfg = AppConfig::load(workspace.path()).expect("load");
        assert_eq!(cfg.webhook.url, "https://n8n.example/webhook/chat");
        assert_eq!(cfg.webhook.timeout_seconds, 30);
        assert_eq!(cfg.typing.char_delay_ms, 5);
        assert_eq!(cfg.typing.sentence_pause_ms, 150);
    }

    #[test]
    fn local_settings_win_over_project_settings() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let dir = runtime_dir(workspace.path());
        fs::create_dir_all(&dir).expect("runtime dir");
        fs::write(
            dir.join("settings.json"),
            r#"{"widget":{"presentation":"modal"}}"#,
        )
        .expect("settings");
        fs::write(
            dir.join("settings.local.json"),
            r#"{"widget":{"presentation":"fullscreen"}}"#,
        )
        .expect("local settings");

        let cfg = AppConfig::load(workspace.path()).expect("load");
        assert_eq!(cfg.widget.presentation, PresentationKind::Fullscreen);
    }

    #[test]
    fn ensure_writes_defaults_once() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let cfg = AppConfig::ensure(workspace.path()).expect("ensure");
        assert_eq!(cfg.redirect.notice(2), "Redirecting in 2 seconds...");
        assert!(AppConfig::project_settings_path(workspace.path()).exists());
    }

    #[test]
    fn auth_token_is_trimmed_and_blank_is_none() {
        let cfg = WebhookConfig {
            auth_token: Some("   ".to_string()),
            auth_token_env: "WLAND_CHAT_TOKEN_UNSET_FOR_TEST".to_string(),
            ..WebhookConfig::default()
        };
        assert_eq!(cfg.resolve_auth_token(), None);

        let cfg = WebhookConfig {
            auth_token: Some(" secret ".to_string()),
            auth_token_env: "WLAND_CHAT_TOKEN_UNSET_FOR_TEST".to_string(),
            ..WebhookConfig::default()
        };
        assert_eq!(cfg.resolve_auth_token().as_deref(), Some("secret"));
    }

    #[test]
    fn redirect_notice_substitutes_seconds() {
        let cfg = RedirectConfig::default();
        assert_eq!(cfg.notice(2), "Redirecting in 2 seconds...");
    }
}
