use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use switchboard_core::MessageType;

/// Messaging gateway: send, schedule and replay messages through the
/// configured providers.
#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about)]
pub struct CliArgs {
    /// How long to wait for scheduled messages before shutting down, in seconds.
    #[arg(long, env = "SWITCHBOARD_DRAIN_TIMEOUT", default_value_t = 60, global = true)]
    pub drain_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective configuration and the profiles found in the environment.
    Config,

    #[command(flatten)]
    Service(ServiceCommand),
}

/// Commands that run against a started messaging service.
#[derive(Subcommand, Debug)]
pub enum ServiceCommand {
    /// Print registered providers and the message type routes.
    Providers,

    /// Send or schedule a single message.
    Send(SendArgs),

    /// Push a JSON-lines file of inbound and outbound messages through the service.
    Replay {
        /// File with one message object per line.
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// sms, mms or email
    #[arg(long = "type", value_parser = parse_message_type)]
    pub message_type: MessageType,

    #[arg(long)]
    pub from: String,

    #[arg(long)]
    pub to: String,

    #[arg(long)]
    pub body: String,

    /// Provider-specific attachment blob
    #[arg(long)]
    pub attachments: Option<String>,

    /// Client timestamp (defaults to now)
    #[arg(long)]
    pub timestamp: Option<String>,

    /// ISO-8601 instant to send at instead of now
    #[arg(long)]
    pub send_at: Option<String>,
}

fn parse_message_type(s: &str) -> Result<MessageType, String> {
    s.parse().map_err(|e: switchboard_core::CoreError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_and_service_commands_parse() {
        let args = CliArgs::try_parse_from(["switchboard", "config"]).unwrap();
        assert!(matches!(args.command, Command::Config));

        let args = CliArgs::try_parse_from([
            "switchboard", "send", "--type", "MMS", "--from", "+1", "--to", "+2", "--body", "hi",
        ])
        .unwrap();
        let Command::Service(ServiceCommand::Send(send)) = args.command else {
            panic!("expected send");
        };
        assert_eq!(send.message_type, MessageType::Mms);
        assert!(send.send_at.is_none());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let err = CliArgs::try_parse_from([
            "switchboard", "send", "--type", "fax", "--from", "+1", "--to", "+2", "--body", "hi",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("fax"));
    }
}
