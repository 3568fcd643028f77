use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use wland_testkit::{MockResponse, MockWebhook};

/// Settings that keep the typing effect instant.
fn write_settings(workspace: &Path, webhook_url: &str, extra: &str) {
    let runtime = workspace.join(".wland-chat");
    fs::create_dir_all(&runtime).expect("runtime dir");
    fs::write(
        runtime.join("settings.local.json"),
        format!(
            r#"{{
  "webhook": {{"url": "{webhook_url}", "timeout_seconds": 5}},
  "typing": {{"char_delay_ms": 0, "sentence_pause_ms": 0, "clause_pause_ms": 0, "words_per_minute": 600000}}
  {extra}
}}"#
        ),
    )
    .expect("settings override");
}

fn command(workspace: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("wland-chat"));
    cmd.current_dir(workspace)
        .env("HOME", workspace)
        .env_remove("WLAND_CHAT_WEBHOOK_URL")
        .env_remove("WLAND_CHAT_AUTH_TOKEN");
    cmd
}

fn run_json(workspace: &Path, args: &[&str]) -> Value {
    let output = command(workspace)
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

fn run_json_with_stdin(workspace: &Path, args: &[&str], stdin: &str) -> Value {
    let output = command(workspace)
        .args(args)
        .write_stdin(stdin)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

#[test]
fn parse_extracts_message_and_directives() {
    let workspace = TempDir::new().expect("workspace");
    let out = run_json_with_stdin(
        workspace.path(),
        &["--json", "parse"],
        r#"[{"output":"See you","redirect":"https://shop.test/thanks","delay":"1500"}]"#,
    );
    assert_eq!(out["message"], "See you");
    assert_eq!(out["has_redirect"], true);
    assert_eq!(out["redirect_url"], "https://shop.test/thanks");
    assert_eq!(out["redirect_delay_ms"], 1500);
}

#[test]
fn parse_rejects_empty_bodies() {
    let workspace = TempDir::new().expect("workspace");
    command(workspace.path())
        .args(["--json", "parse", "-"])
        .write_stdin("  \n")
        .assert()
        .failure();
}

#[test]
fn render_reads_a_file_and_sanitizes() {
    let workspace = TempDir::new().expect("workspace");
    let input = workspace.path().join("reply.md");
    fs::write(&input, "**Hi** <b>there</b>\n[x](javascript:alert(1))").expect("input");
    let out = run_json(
        workspace.path(),
        &["--json", "render", input.to_string_lossy().as_ref()],
    );
    let html = out["html"].as_str().expect("html");
    assert!(html.starts_with("<strong>Hi</strong> &lt;b&gt;there&lt;/b&gt;<br>"));
    assert!(html.contains(r##"href="#""##));
    assert!(!html.contains("javascript:"));
}

#[test]
fn config_show_redacts_auth_token() {
    let workspace = TempDir::new().expect("workspace");
    let runtime = workspace.path().join(".wland-chat");
    fs::create_dir_all(&runtime).expect("runtime dir");
    fs::write(
        runtime.join("settings.json"),
        r#"{"webhook":{"url":"https://n8n.test/webhook/chat","auth_token":"hunter2"},"gdpr":{"enabled":true}}"#,
    )
    .expect("settings");
    let out = run_json(workspace.path(), &["--json", "config", "show"]);
    assert_eq!(out["webhook"]["auth_token"], "***REDACTED***");
    assert_eq!(out["gdpr"]["enabled"], true);
}

#[test]
fn config_init_writes_project_settings_once() {
    let workspace = TempDir::new().expect("workspace");
    let out = run_json(workspace.path(), &["--json", "config", "init"]);
    assert_eq!(out["webhook_configured"], false);
    let path = workspace.path().join(".wland-chat/settings.json");
    assert!(path.exists());

    fs::write(&path, r#"{"webhook":{"url":"https://n8n.test/hook"}}"#).expect("edit settings");
    let again = run_json(workspace.path(), &["--json", "config", "init"]);
    assert_eq!(again["webhook_configured"], true);
}

#[test]
fn send_without_webhook_reports_configuration_diagnostic() {
    let workspace = TempDir::new().expect("workspace");
    write_settings(workspace.path(), "", "");
    let out = run_json(workspace.path(), &["--json", "send", "hello"]);
    assert_eq!(out["status"], "failed");
    assert_eq!(out["diagnostic"]["kind"], "not_configured");
    assert_eq!(out["history_len"], 2);
    let transcript = out["transcript"].as_array().expect("transcript");
    assert_eq!(transcript[0]["role"], "user");
    assert_eq!(transcript[1]["role"], "assistant");
}

#[test]
fn send_posts_payload_and_prints_reply() {
    let workspace = TempDir::new().expect("workspace");
    let server = MockWebhook::start(vec![MockResponse::json(
        200,
        r#"{"output":"Hello **there**"}"#,
    )]);
    write_settings(workspace.path(), &server.endpoint, "");

    let out = run_json(
        workspace.path(),
        &["--json", "send", "hi", "--session-id", "fp_cli"],
    );
    assert_eq!(out["status"], "replied");
    assert_eq!(out["reply"], "Hello **there**");
    assert_eq!(out["session_id"], "fp_cli");
    assert_eq!(out["transcript"][1]["text"], "Hello there");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_str(&requests[0].body).expect("payload");
    assert_eq!(body["chatInput"], "hi");
    assert_eq!(body["sessionId"], "fp_cli");
}

#[test]
fn send_text_mode_prints_reply_to_stdout() {
    let workspace = TempDir::new().expect("workspace");
    let server = MockWebhook::start(vec![MockResponse::json(200, r#"{"output":"Plain reply"}"#)]);
    write_settings(workspace.path(), &server.endpoint, "");

    let output = command(workspace.path())
        .args(["send", "hi"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).expect("utf8");
    assert!(stdout.contains("Plain reply"));
}

#[test]
fn send_requires_consent_when_privacy_notice_enabled() {
    let workspace = TempDir::new().expect("workspace");
    let server = MockWebhook::start(vec![MockResponse::json(200, r#"{"output":"ok"}"#)]);
    write_settings(
        workspace.path(),
        &server.endpoint,
        r#", "gdpr": {"enabled": true}"#,
    );

    command(workspace.path())
        .args(["--json", "send", "hi"])
        .assert()
        .failure();
    assert_eq!(server.request_count(), 0);

    let out = run_json(workspace.path(), &["--json", "send", "hi", "--accept-consent"]);
    assert_eq!(out["status"], "replied");

    // Consent persists in the workspace store.
    let again = run_json(workspace.path(), &["--json", "send", "again"]);
    assert_eq!(again["status"], "replied");
}

#[test]
fn redirect_saves_conversation_for_restore() {
    let workspace = TempDir::new().expect("workspace");
    let server = MockWebhook::start(vec![MockResponse::json(
        200,
        r#"{"output":"Taking you there","redirect":"https://shop.test/checkout","delay":0}"#,
    )]);
    write_settings(workspace.path(), &server.endpoint, "");

    let out = run_json(
        workspace.path(),
        &[
            "--json",
            "send",
            "checkout please",
            "--page-url",
            "https://shop.test/cart",
        ],
    );
    assert_eq!(out["redirected_to"], "https://shop.test/checkout");
    let effects = out["page_effects"].as_array().expect("effects");
    assert!(
        effects
            .iter()
            .any(|e| e["kind"] == "navigate" && e["target"] == "https://shop.test/checkout")
    );

    let restored = run_json(workspace.path(), &["--json", "restore"]);
    assert_eq!(restored["redirect_pending"], true);
    assert_eq!(restored["snapshot"]["url"], "https://shop.test/cart");
    let history = restored["snapshot"]["history"].as_array().expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["content"], "Taking you there");

    let consumed = run_json(workspace.path(), &["--json", "restore"]);
    assert!(consumed["snapshot"].is_null());
    assert_eq!(consumed["redirect_pending"], false);
}

#[test]
fn custom_action_is_reported_as_page_event() {
    let workspace = TempDir::new().expect("workspace");
    let server = MockWebhook::start(vec![MockResponse::json(
        200,
        r#"{"output":"Done","action":"add_to_cart","data":{"sku":"A1"}}"#,
    )]);
    write_settings(workspace.path(), &server.endpoint, "");

    let out = run_json(workspace.path(), &["--json", "send", "buy A1"]);
    assert_eq!(out["actions"][0]["action"], "add_to_cart");
    assert_eq!(out["actions"][0]["succeeded"], true);
    let event = &out["page_effects"][0];
    assert_eq!(event["kind"], "event");
    assert_eq!(event["target"], "wland_chat_custom_action");
    assert_eq!(event["detail"]["data"]["sku"], "A1");
}

#[test]
fn chat_loop_sends_each_line_until_quit() {
    let workspace = TempDir::new().expect("workspace");
    let server = MockWebhook::start(vec![
        MockResponse::json(200, r#"{"output":"one"}"#),
        MockResponse::json(200, r#"{"output":"two"}"#),
    ]);
    write_settings(workspace.path(), &server.endpoint, "");

    let out = run_json_with_stdin(
        workspace.path(),
        &["--json", "chat"],
        "first\n\nsecond\n/quit\nnever sent\n",
    );
    let exchanges = out["exchanges"].as_array().expect("exchanges");
    assert_eq!(exchanges.len(), 2);
    assert_eq!(exchanges[0]["reply"], "one");
    assert_eq!(exchanges[1]["reply"], "two");
    assert_eq!(exchanges[1]["history_len"], 4);
    assert_eq!(server.request_count(), 2);
}
