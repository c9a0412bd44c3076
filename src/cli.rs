use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Aterges gateway: BYOK integrations and chat proxy
#[derive(Parser)]
#[command(name = "aterges", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to ATERGES_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply database migrations and exit
    Migrate,

    /// Inspect and manage stored integrations
    Integration {
        #[command(subcommand)]
        command: IntegrationCommands,
    },
}

#[derive(Subcommand)]
pub enum IntegrationCommands {
    /// List a user's integrations
    List {
        #[arg(long)]
        user: Uuid,
    },
    /// Run the provider check now and record the outcome
    Verify {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        id: Uuid,
    },
    /// Delete an integration and its secret
    Delete {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        id: Uuid,
    },
}
