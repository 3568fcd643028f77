use anyhow::Result;
use serde_json::json;
use std::fs;
use std::io::Read;
use std::path::Path;
use wland_render::render_markdown;
use wland_webhook::extract_reply;

use crate::output::print_json;

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => Ok(fs::read_to_string(path)?),
        _ => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            Ok(raw)
        }
    }
}

pub(crate) fn run_parse(path: Option<&Path>, json_mode: bool) -> Result<()> {
    let raw = read_input(path)?;
    let parsed = extract_reply(&raw)?;
    if json_mode {
        return print_json(&parsed);
    }
    println!("{}", parsed.message);
    if parsed.has_redirect
        && let Some(url) = &parsed.redirect_url
    {
        println!("redirect: {url} after {} ms", parsed.redirect_delay_ms);
    }
    if parsed.has_action
        && let Some(action) = &parsed.action_type
    {
        match &parsed.action_data {
            Some(data) => println!("action: {action} {data}"),
            None => println!("action: {action}"),
        }
    }
    Ok(())
}

pub(crate) fn run_render(path: Option<&Path>, json_mode: bool) -> Result<()> {
    let raw = read_input(path)?;
    let html = render_markdown(raw.trim_end_matches(['\n', '\r']));
    if json_mode {
        print_json(&json!({ "html": html }))
    } else {
        println!("{html}");
        Ok(())
    }
}
