//! CLI argument definitions for pagerlink.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pagerlink -- chat-ops identity and message linkage.
#[derive(Parser)]
#[command(
    name = "pagerlink",
    version,
    about = "pagerlink -- OAuth login and Mattermost linkage for chat-ops alerting",
    long_about = "Signs users in with Google, Slack, or Mattermost, installs the Slack app, \
                  and keeps the records that tie Mattermost posts and accounts to alert \
                  groups and users."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open the database and apply pending migrations.
    Migrate,

    /// Print the authorization URL for a backend.
    Authorize {
        /// Backend identifier: google-oauth2, slack-login,
        /// slack-install-free, or mattermost-login.
        backend: String,
        /// Internal user id starting the flow.
        #[arg(long)]
        user: String,
        /// Organization id of that user.
        #[arg(long)]
        org: String,
    },

    /// Finish a flow from a captured redirect URL.
    Complete {
        backend: String,
        /// The full URL the provider redirected the browser to.
        #[arg(long)]
        callback_url: String,
    },

    /// Authorize, wait for the redirect locally, and complete.
    Login {
        backend: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
        /// Port for the local callback listener (defaults to `[callback] port`).
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Mirror host users and alert groups.
    Host {
        #[command(subcommand)]
        action: HostAction,
    },

    /// Record and look up Mattermost message links.
    Messages {
        #[command(subcommand)]
        action: MessageAction,
    },

    /// Inspect Mattermost identity links.
    Identities {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Maintain state tokens.
    Tokens {
        #[command(subcommand)]
        action: TokenAction,
    },
}

/// Actions for host anchor records.
#[derive(Subcommand)]
pub enum HostAction {
    /// Create or update a user.
    AddUser {
        id: String,
        #[arg(long)]
        org: String,
    },
    /// Create or update an alert group.
    AddAlertGroup {
        id: String,
        #[arg(long)]
        org: String,
    },
    /// Delete a user and everything linked to it.
    RemoveUser { id: String },
    /// Delete an alert group and its message links.
    RemoveAlertGroup { id: String },
}

/// Actions for message links.
#[derive(Subcommand)]
pub enum MessageAction {
    /// Record a post made for an alert group.
    Record {
        #[arg(long)]
        alert_group: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        post: String,
        /// alert-group-message or log-message.
        #[arg(long = "type", default_value = "alert-group-message")]
        message_type: String,
    },
    /// Find the link for a post.
    Lookup {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        post: String,
    },
    /// List links for an alert group.
    List { alert_group: String },
}

/// Actions for identity links.
#[derive(Subcommand)]
pub enum IdentityAction {
    /// Show the link of an internal user.
    Show { user: String },
    /// Resolve a Mattermost user id to its internal user.
    Lookup { mattermost_user_id: String },
}

/// Actions for state tokens.
#[derive(Subcommand)]
pub enum TokenAction {
    /// Delete expired and already-used tokens.
    Purge,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_message_record() {
        let cli = Cli::try_parse_from([
            "pagerlink",
            "messages",
            "record",
            "--alert-group",
            "ag-1",
            "--channel",
            "c-1",
            "--post",
            "p-1",
            "--type",
            "log-message",
        ])
        .unwrap();
        match cli.command {
            Commands::Messages {
                action: MessageAction::Record { message_type, .. },
            } => assert_eq!(message_type, "log-message"),
            _ => panic!("expected messages record"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["pagerlink", "migrate", "--config", "other.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }
}
