use anyhow::Result;
use serde_json::json;
use std::path::Path;
use wland_core::AppConfig;

use crate::ConfigCmd;
use crate::output::{print_json, redact_config_for_display};

pub(crate) fn run_config(workspace: &Path, cmd: ConfigCmd, json_mode: bool) -> Result<()> {
    match cmd {
        ConfigCmd::Show => {
            let cfg = AppConfig::load(workspace)?;
            let display_cfg = redact_config_for_display(&cfg)?;
            if json_mode {
                print_json(&display_cfg)?;
            } else {
                println!("{}", serde_json::to_string_pretty(&display_cfg)?);
            }
        }
        ConfigCmd::Init => {
            let cfg = AppConfig::ensure(workspace)?;
            let path = AppConfig::project_settings_path(workspace);
            if json_mode {
                print_json(&json!({
                    "path": path.display().to_string(),
                    "webhook_configured": cfg.webhook.resolve_url().is_some(),
                }))?;
            } else {
                println!("settings: {}", path.display());
                if cfg.webhook.resolve_url().is_none() {
                    println!("webhook.url is empty; set it there or export WLAND_CHAT_WEBHOOK_URL");
                }
            }
        }
    }
    Ok(())
}
