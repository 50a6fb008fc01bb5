//! `conductor play`

use crate::host;
use anyhow::{Context, Result};
use conductor_core::{format_error_for_cli, names, SequencePriority};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

pub struct PlayArgs<'a> {
    pub config: Option<&'a Path>,
    pub plugin: &'a str,
    pub sequence: &'a str,
    pub context: Option<&'a str>,
    pub priority: SequencePriority,
    pub manifest: Option<&'a Path>,
    pub signals: &'a [String],
    pub events: bool,
}

/// Split `NAME` or `NAME=JSON`; a payload that is not JSON is sent as a string
pub fn parse_signal(raw: &str) -> (String, Value) {
    match raw.split_once('=') {
        Some((name, payload)) => {
            let payload = serde_json::from_str(payload)
                .unwrap_or_else(|_| Value::String(payload.to_string()));
            (name.to_string(), payload)
        }
        None => (raw.to_string(), json!({})),
    }
}

pub async fn run(args: PlayArgs<'_>) -> Result<()> {
    let config = host::load_config(args.config)?;
    let manifest = host::load_manifest(args.manifest, &config)?;
    let (conductor, _report) = host::bootstrap(&config, &manifest);
    let client = conductor.client();

    let context: Value = match args.context {
        Some(raw) => serde_json::from_str(raw).context("--context is not valid JSON")?,
        None => json!({}),
    };

    // Answer each waiting beat with the first matching --signal
    let pending: Arc<Mutex<Vec<(String, Value)>>> =
        Arc::new(Mutex::new(args.signals.iter().map(|s| parse_signal(s)).collect()));
    let responder = client.clone();
    let waiting = client.subscribe(names::BEAT_WAITING, move |payload| {
        let Some(signal) = payload.get("signal").and_then(Value::as_str) else {
            return Ok(());
        };
        let next = {
            let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending
                .iter()
                .position(|(name, _)| name == signal)
                .map(|i| pending.remove(i))
        };
        match next {
            Some((name, payload)) => {
                responder.signal(&name, payload);
            }
            None => warn!(signal = %signal, "Beat waiting for a signal nobody will send"),
        }
        Ok(())
    });

    let printer = args.events.then(|| {
        let mut tap = client.tap();
        tokio::spawn(async move {
            loop {
                match tap.recv().await {
                    Ok(event) => println!("{} {}", event.name, event.payload),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event printer fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let play = client.play(args.plugin, args.sequence, context, args.priority);
    tokio::pin!(play);
    let finished = tokio::select! {
        result = &mut play => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            warn!("Interrupted, cancelling play");
            conductor.shutdown();
            play.await
        }
    };

    waiting.unsubscribe();
    if let Some(printer) = printer {
        printer.abort();
    }

    match result {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format_error_for_cli(&e));
            std::process::exit(1);
        }
    }
}
