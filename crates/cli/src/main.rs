mod cli;
mod replay;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use switchboard_core::config::load_dotenv;
use switchboard_core::time::now_timestamp;
use switchboard_core::Config;
use switchboard_engine::{MessagingService, OutboundMessage, SendReceipt};
use switchboard_storage::MemoryStore;

use crate::cli::{CliArgs, Command, SendArgs, ServiceCommand};
use crate::replay::ReplayEntry;

fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = Config::from_env();
    config.log_summary();

    let command = match args.command {
        Command::Config => {
            let output = json!({
                "config": config.summary(),
                "available_profiles": Config::available_profiles(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }
        Command::Service(command) => command,
    };

    let service = MessagingService::from_config(&config, Arc::new(MemoryStore::new()))
        .context("failed to start messaging service")?;

    let outcome = match command {
        ServiceCommand::Providers => Ok(Outcome::Providers),
        ServiceCommand::Send(send) => send_one(&service, send).map(Outcome::Sent),
        ServiceCommand::Replay { file } => replay_file(&service, &file).map(|rejected| Outcome::Replayed { rejected }),
    };

    drain(&service, Duration::from_secs(args.drain_timeout));
    service.shutdown();

    let output = render(&service, outcome?)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// What a command did, rendered once the service has drained.
enum Outcome {
    Providers,
    Sent(SendReceipt),
    Replayed { rejected: usize },
}

fn send_one(service: &MessagingService, args: SendArgs) -> Result<SendReceipt> {
    let message = OutboundMessage {
        from: args.from,
        to: args.to,
        message_type: Some(args.message_type),
        body: args.body,
        attachments: args.attachments,
        timestamp: args.timestamp.unwrap_or_else(now_timestamp),
        send_at: args.send_at,
    };

    let receipt = service.send(message).context("send failed")?;
    info!(
        message_id = receipt.message_id,
        conversation_id = receipt.conversation_id,
        provider = %receipt.provider,
        "Send accepted"
    );
    Ok(receipt)
}

/// Returns how many entries the service rejected.
fn replay_file(service: &MessagingService, path: &Path) -> Result<usize> {
    let entries = replay::read_entries(path)?;
    info!(entries = entries.len(), path = %path.display(), "Replaying messages");

    let mut rejected = 0;
    for entry in entries {
        let outcome = match entry {
            ReplayEntry::Outbound(message) => service.send(message).map(|r| r.message_id),
            ReplayEntry::Inbound(message) => service.record_inbound(message).map(|r| r.message_id),
        };
        if let Err(e) = outcome {
            rejected += 1;
            warn!(error = %e, "Replay entry rejected");
        }
    }
    Ok(rejected)
}

fn drain(service: &MessagingService, timeout: Duration) {
    let pending = service.scheduler().pending_count();
    if pending == 0 {
        return;
    }
    info!(pending, "Waiting for scheduled messages");
    if !service.wait_until_idle(timeout) {
        warn!(
            pending = service.scheduler().pending_count(),
            "Drain timeout reached, remaining scheduled messages will not be sent"
        );
    }
}

fn render(service: &MessagingService, outcome: Outcome) -> Result<serde_json::Value> {
    match outcome {
        Outcome::Providers => {
            let registry = service.registry();
            Ok(json!({
                "providers": registry.available_providers(),
                "mappings": registry.mappings(),
            }))
        }
        Outcome::Sent(receipt) => {
            let messages = service.messages(receipt.conversation_id)?;
            Ok(json!({ "receipt": receipt, "messages": messages }))
        }
        Outcome::Replayed { rejected } => {
            let mut conversations = Vec::new();
            for conversation in service.conversations()? {
                let messages = service.messages(conversation.id)?;
                conversations.push(json!({ "conversation": conversation, "messages": messages }));
            }
            Ok(json!({ "rejected": rejected, "conversations": conversations }))
        }
    }
}
