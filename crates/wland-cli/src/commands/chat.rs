use anyhow::{Result, anyhow, bail};
use serde_json::{Value, json};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use wland_chat::{ChatController, ChatPorts, SendOutcome, SendStatus, presentation_for};
use wland_core::{AppConfig, KeyValueStore, SystemClock};
use wland_observe::Observer;
use wland_store::{ConversationStore, Scope, SqliteStore};
use wland_webhook::WebhookClient;

use crate::SessionArgs;
use crate::output::print_json;
use crate::terminal::{FlagSessionIds, TerminalHost, TerminalView};

/// One controller bound to terminal ports. Each invocation behaves like a
/// page load: the tab scope carries a conversation across a redirect, the
/// local scope carries consent and the interaction flag.
struct TerminalSession {
    controller: ChatController,
    view: TerminalView,
    host: TerminalHost,
}

fn observer_for(workspace: &Path, cfg: &AppConfig, verbose: bool) -> Result<Observer> {
    let mut observer = Observer::new(workspace, &cfg.log)?;
    if verbose {
        observer.set_verbose(true);
    }
    Ok(observer)
}

fn open_session(
    workspace: &Path,
    args: &SessionArgs,
    json_mode: bool,
    verbose: bool,
) -> Result<TerminalSession> {
    let cfg = AppConfig::load(workspace)?;
    let observer = observer_for(workspace, &cfg, verbose)?;
    let view = TerminalView::new(json_mode);
    let host = TerminalHost::new(&args.page_url, json_mode);
    let tab_store: Arc<dyn KeyValueStore> =
        Arc::new(SqliteStore::for_workspace(workspace, Scope::Tab)?);
    let persistent_store: Arc<dyn KeyValueStore> =
        Arc::new(SqliteStore::for_workspace(workspace, Scope::Local)?);
    let transport = WebhookClient::new(cfg.webhook.clone())?;
    let presentation = presentation_for(cfg.widget.presentation);

    let mut controller = ChatController::new(
        cfg,
        presentation,
        ChatPorts {
            view: Box::new(view.clone()),
            host: Box::new(host.clone()),
            tab_store,
            persistent_store,
            clock: Arc::new(SystemClock),
            session_ids: Box::new(FlagSessionIds(args.session_id.clone())),
            transport: Box::new(transport),
        },
        observer,
    );
    controller.initialize();
    controller.open();
    Ok(TerminalSession {
        controller,
        view,
        host,
    })
}

fn status_label(status: SendStatus) -> &'static str {
    match status {
        SendStatus::Ignored => "ignored",
        SendStatus::ConsentRequired => "consent_required",
        SendStatus::Replied => "replied",
        SendStatus::Failed => "failed",
    }
}

fn outcome_json(session: &TerminalSession, outcome: &SendOutcome) -> Value {
    json!({
        "status": status_label(outcome.status),
        "reply": outcome.reply,
        "streamed": outcome.streamed,
        "cancelled": outcome.cancelled,
        "diagnostic": outcome.diagnostic,
        "actions": outcome.actions.iter().map(|action| json!({
            "action": action.action,
            "succeeded": action.succeeded,
            "close_requested": action.close_requested,
        })).collect::<Vec<_>>(),
        "action_errors": outcome
            .action_errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        "redirected_to": outcome.redirected_to,
        "session_id": session.controller.session_id(),
        "widget_open": session.controller.is_open(),
        "history_len": session.controller.history().len(),
        "transcript": session.view.transcript(),
        "page_effects": session.host.effects(),
    })
}

pub(crate) fn run_send(
    workspace: &Path,
    text: &str,
    args: &SessionArgs,
    json_mode: bool,
    verbose: bool,
) -> Result<()> {
    let mut session = open_session(workspace, args, json_mode, verbose)?;
    if session.controller.is_gdpr_locked() {
        if !args.accept_consent {
            bail!("privacy notice not accepted; rerun with --accept-consent");
        }
        session.controller.accept_consent();
    }

    let outcome = session.controller.send_message(text);
    if json_mode {
        return print_json(&outcome_json(&session, &outcome));
    }
    match outcome.status {
        SendStatus::Ignored => Err(anyhow!("nothing to send")),
        SendStatus::ConsentRequired => Err(anyhow!("privacy notice not accepted")),
        SendStatus::Failed => Err(anyhow!(
            "{}",
            outcome
                .diagnostic
                .map(|diagnostic| diagnostic.title)
                .unwrap_or_else(|| "request failed".to_string())
        )),
        SendStatus::Replied => Ok(()),
    }
}

fn prompt(label: &str) -> Result<Option<String>> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

pub(crate) fn run_chat(
    workspace: &Path,
    args: &SessionArgs,
    json_mode: bool,
    verbose: bool,
) -> Result<()> {
    let mut session = open_session(workspace, args, json_mode, verbose)?;
    if session.controller.is_gdpr_locked() {
        let accepted = args.accept_consent
            || (!json_mode
                && prompt("accept? [y/N] ")?
                    .is_some_and(|answer| matches!(answer.trim(), "y" | "Y" | "yes")));
        if !accepted {
            session.controller.decline_consent();
            return Ok(());
        }
        session.controller.accept_consent();
    }

    let mut outcomes = Vec::new();
    loop {
        let label = if json_mode { "" } else { "> " };
        let Some(line) = prompt(label)? else {
            break;
        };
        if line.trim() == "/quit" {
            break;
        }
        let outcome = session.controller.send_message(&line);
        if outcome.status == SendStatus::Ignored {
            continue;
        }
        if json_mode {
            outcomes.push(outcome_json(&session, &outcome));
        }
        if outcome.redirected_to.is_some() || !session.controller.is_open() {
            break;
        }
    }
    session.controller.close();

    if json_mode {
        print_json(&json!({
            "session_id": session.controller.session_id(),
            "exchanges": outcomes,
        }))?;
    }
    Ok(())
}

pub(crate) fn run_restore(workspace: &Path, json_mode: bool, verbose: bool) -> Result<()> {
    let cfg = AppConfig::load(workspace)?;
    let observer = observer_for(workspace, &cfg, verbose)?;
    let tab_store: Arc<dyn KeyValueStore> =
        Arc::new(SqliteStore::for_workspace(workspace, Scope::Tab)?);
    let conversation = ConversationStore::new(tab_store, Arc::new(SystemClock), observer);

    let redirect_pending = conversation.check_and_clear_redirect_pending();
    let snapshot = conversation.restore();
    if json_mode {
        return print_json(&json!({
            "redirect_pending": redirect_pending,
            "snapshot": snapshot,
        }));
    }
    match snapshot {
        Some(snapshot) => {
            println!(
                "session {} from {} ({} messages)",
                snapshot.session_id,
                snapshot.url,
                snapshot.history.len()
            );
            for message in &snapshot.history {
                println!("{}> {}", message.role.as_str(), message.content);
            }
        }
        None => println!("no saved conversation"),
    }
    Ok(())
}
