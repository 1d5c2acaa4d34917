//! `qme guest`: N tabs of one guest sharing a storage profile, driven from
//! stdin.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use qme_authority::IssuanceClient;
use qme_core::{LeaveReason, ProximityPhase, TabId, parse_now_serving};
use qme_guest::{Bus, GuestContext, GuestSession, GuestSnapshot, fabric};
use qme_store::{JsonFileBackend, Profile};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::cli::GuestOpts;
use crate::client::UnixTransport;

type Tab = Arc<GuestSession<Arc<UnixTransport>>>;

const HELP: &str = "commands: c [tab] check in | l [tab] leave | r [tab] claim | \
                    n <value> set now serving | s show | q quit";

/// One line of stdin. Tab numbers are 1-based; omitted means tab 1.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    CheckIn(usize),
    Leave(usize),
    Claim(usize),
    NowServing(i64),
    Show,
    Quit,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(Input::Show);
    };
    let arg = words.next();
    let tab = || -> Result<usize, String> {
        match arg {
            None => Ok(0),
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(n - 1),
                _ => Err(format!("bad tab number: {raw}")),
            },
        }
    };
    match cmd {
        "c" | "checkin" => tab().map(Input::CheckIn),
        "l" | "leave" => tab().map(Input::Leave),
        "r" | "claim" => tab().map(Input::Claim),
        "n" | "now" => arg
            .map(|raw| Input::NowServing(parse_now_serving(&Value::String(raw.to_string()))))
            .ok_or_else(|| "usage: n <value>".to_string()),
        "s" | "show" => Ok(Input::Show),
        "q" | "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command: {other}")),
    }
}

/// Entry point for `qme guest`.
pub async fn cmd_guest(opts: GuestOpts, socket_path: &str) -> anyhow::Result<()> {
    let scope = opts.queue.scope()?;
    let profile = match &opts.profile_dir {
        Some(dir) => Profile::new(JsonFileBackend::open(dir.join("local_storage.json"))?),
        None => Profile::in_memory(),
    };
    let bus = Bus::new();
    let transport = Arc::new(UnixTransport::new(Path::new(socket_path)));
    let cancel = CancellationToken::new();

    let mut tabs: Vec<Tab> = Vec::new();
    let mut tasks = Vec::new();
    for n in 1..=opts.tabs.max(1) {
        let tab = TabId::new(format!("tab-{n}"));
        let ctx = GuestContext::new(scope.clone(), profile.local_storage(tab))
            .with_bus(&bus)
            .with_poll_interval(Duration::from_millis(opts.poll_interval_ms.max(1)));
        let session = Arc::new(GuestSession::new(ctx, IssuanceClient::new(Arc::clone(&transport))));

        match session.start().await {
            Ok(outcome) => tracing::info!(tab = n, ?outcome, "tab mounted"),
            Err(e) => tracing::warn!(tab = n, "no ticket yet: {e}"),
        }
        tasks.push(fabric::spawn(Arc::clone(&session), cancel.clone()));
        tasks.push(spawn_printer(&session, cancel.clone()));
        tabs.push(session);
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        match parse_input(&line) {
            Ok(Input::Quit) => break,
            Ok(input) => run_input(&tabs, input).await,
            Err(msg) => println!("{msg}\n{HELP}"),
        }
    }

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn run_input(tabs: &[Tab], input: Input) {
    let pick = |i: usize| {
        let tab = tabs.get(i);
        if tab.is_none() {
            println!("no tab {}", i + 1);
        }
        tab
    };
    match input {
        Input::CheckIn(i) => {
            if let Some(tab) = pick(i) {
                if !tab.check_in().await {
                    println!("tab {}: nothing to check in", i + 1);
                }
            }
        }
        Input::Leave(i) => {
            if let Some(tab) = pick(i) {
                tab.leave(LeaveReason::User).await;
            }
        }
        Input::Claim(i) => {
            if let Some(tab) = pick(i) {
                if let Err(e) = tab.claim().await {
                    println!("tab {}: claim failed: {e}", i + 1);
                }
            }
        }
        Input::NowServing(value) => {
            if let Some(tab) = pick(0) {
                tab.publish_now_serving(value).await;
            }
        }
        Input::Show | Input::Quit => {
            for tab in tabs {
                println!("{}", format_snapshot(&tab.snapshot()));
            }
        }
    }
}

/// Print every view change of one tab until cancelled.
fn spawn_printer(session: &Tab, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let mut rx = session.subscribe();
    tokio::spawn(async move {
        println!("{}", format_snapshot(&rx.borrow_and_update()));
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    println!("{}", format_snapshot(&rx.borrow_and_update()));
                }
            }
        }
    })
}

/// One status line per tab, plus notice lines when a notice is up.
pub fn format_snapshot(snap: &GuestSnapshot) -> String {
    let mut out = format!("[{} {}]", snap.tab, snap.queue);
    match snap.ticket {
        Some(ticket) => {
            out.push_str(&format!(" ticket #{}", ticket.number));
            if ticket.checked_in {
                out.push_str(" (checked in)");
            }
        }
        None => out.push_str(" no ticket"),
    }
    match snap.now_serving {
        Some(n) => out.push_str(&format!("  now serving {n}")),
        None => out.push_str("  now serving ?"),
    }
    if let Some(count) = snap.queue_count {
        out.push_str(&format!("  queued {count}"));
    }
    let phase = match snap.phase {
        ProximityPhase::None => None,
        ProximityPhase::Waiting => Some("waiting"),
        ProximityPhase::Approaching => Some("approaching"),
        ProximityPhase::CheckedInWaiting => Some("checked in, waiting"),
        ProximityPhase::NowServing => Some("your turn"),
        ProximityPhase::Left => Some("left"),
    };
    if let Some(phase) = phase {
        out.push_str(&format!("  [{phase}]"));
    }
    if snap.view.highlight {
        out.push_str(" *");
    }
    if snap.view.show_check_in {
        out.push_str("  <Check In>");
    }
    if let Some(reason) = snap.left {
        out.push_str(&format!("\n  left the queue ({reason})"));
    }
    if let Some(notice) = snap.view.notice {
        let (title, body) = notice.lines();
        out.push_str(&format!("\n  {title}\n  {body}"));
    }
    out
}

// ─── Tests ───────────────────────────────────────────────────────────
