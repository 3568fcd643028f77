use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use wland_core::AppConfig;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn redact_config_for_display(cfg: &AppConfig) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(webhook) = value
        .get_mut("webhook")
        .and_then(|entry| entry.as_object_mut())
        && webhook
            .get("auth_token")
            .is_some_and(|token| !token.is_null())
    {
        webhook.insert("auth_token".to_string(), json!("***REDACTED***"));
    }
    Ok(value)
}
