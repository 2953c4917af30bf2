//! CLI entry point for Runwire.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::aggregator::{AggregatorEffect, ChunkAggregator, ProtocolViolation};
use crate::config::RunConfig;
use crate::error::RunwireError;
use crate::finalizer::{finalize_run_events, FinalizeOptions};
use crate::types::{Event, Message, Role};

/// Runwire CLI
#[derive(Parser, Debug)]
#[command(name = "runwire", version, about = "Runwire: agent run event-stream tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Finalize a recorded event log and rebuild its messages
    Replay(ReplayArgs),
}

/// Arguments for the `replay` subcommand.
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Event log, one JSON event per line
    pub file: PathBuf,

    /// Treat the run as stopped by the user
    #[arg(long)]
    pub stop: bool,

    /// Run config TOML (interruption message)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print only the reconstructed messages
    #[arg(long)]
    pub messages_only: bool,
    /// Fail on the first protocol violation in the log
    #[arg(long)]
    pub strict: bool,
}

/// Result of replaying one recorded log.
#[derive(Debug, Clone)]
pub struct ReplayOutput {
    pub events: Vec<Event>,
    pub messages: Vec<Message>,
    pub violations: Vec<ProtocolViolation>,
}

impl ReplayOutput {
    /// Reject the replay if the log broke the event protocol.
    pub fn strict(self) -> Result<Self, RunwireError> {
        match self.violations.first() {
            Some(violation) => Err(violation.clone().into()),
            None => Ok(self),
        }
    }
}

/// Parse a JSONL event log. Blank lines are skipped.
pub fn read_event_log(path: &Path) -> Result<Vec<Event>, RunwireError> {
    let file = std::fs::File::open(path)?;
    let mut events = Vec::new();
    for (index, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|e| {
            RunwireError::InvalidArgument(format!("{}:{}: {e}", path.display(), index + 1))
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Finalize `events` and rebuild the messages they describe.
pub fn replay_events(events: &[Event], options: &FinalizeOptions) -> ReplayOutput {
    let finalized = finalize_run_events(events, options);
    let mut aggregator = ChunkAggregator::new();
    let mut messages: Vec<Message> = Vec::new();
    let mut orphan_parent: Option<String> = None;

    for event in &finalized {
        match aggregator.apply(event) {
            AggregatorEffect::MessageSealed(message) => {
                orphan_parent = None;
                match messages.iter_mut().find(|m| m.id == message.id) {
                    // A parent created for an earlier tool call.
                    Some(existing) => existing.content = message.content,
                    None => messages.push(message),
                }
            }
            AggregatorEffect::ToolCallSealed(call) => {
                let parent_id = call
                    .parent_message_id
                    .clone()
                    .or_else(|| orphan_parent.clone())
                    .unwrap_or_else(|| {
                        let id = Uuid::new_v4().to_string();
                        orphan_parent = Some(id.clone());
                        id
                    });
                let reference = call.to_ref();
                match messages.iter_mut().rev().find(|m| m.id == parent_id) {
                    Some(parent) => parent.tool_calls.push(reference),
                    None => {
                        let mut parent = Message::new(parent_id, Role::Assistant, "");
                        parent.tool_calls.push(reference);
                        messages.push(parent);
                    }
                }
            }
            AggregatorEffect::ToolResultObserved(message) => messages.push(message),
            AggregatorEffect::Snapshot(snapshot) => messages = snapshot,
            AggregatorEffect::Applied
            | AggregatorEffect::Lifecycle
            | AggregatorEffect::Violation(_) => {}
        }
    }

    ReplayOutput {
        violations: aggregator.violations().to_vec(),
        events: finalized,
        messages,
    }
}

/// Execute `runwire replay`.
pub fn handle_replay(args: &ReplayArgs) -> Result<(), RunwireError> {
    let config = RunConfig::load(args.config.as_deref())?;
    let events = read_event_log(&args.file)?;
    tracing::debug!(file = %args.file.display(), events = events.len(), "replaying event log");

    let options = FinalizeOptions {
        stop_requested: args.stop,
        interruption_message: config.interruption_message,
    };
    let output = replay_events(&events, &options);
    for violation in &output.violations {
        tracing::warn!(%violation, "protocol violation in recorded log");
    }
    let output = if args.strict { output.strict()? } else { output };

    if !args.messages_only {
        for event in &output.events {
            println!("{}", serde_json::to_string(event)?);
        }
    }
    println!("{}", serde_json::to_string_pretty(&output.messages)?);
    Ok(())
}
