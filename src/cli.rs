use clap::{Parser, Subcommand};

/// smgr: secrets lifecycle and lock manager
#[derive(Parser)]
#[command(name = "smgr", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the rotation job
    Serve {
        /// Port to bind (overrides SMGR_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply database migrations and exit
    Migrate,

    /// Manage secret groups
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },

    /// Inspect and rotate secrets
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },

    /// Run one pass of the rotation job (due rotations and expirations)
    RotateDue,
}

#[derive(Subcommand)]
pub enum GroupCommands {
    /// List secret groups
    List,
    /// Create a secret group
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SecretCommands {
    /// List secret metadata
    List {
        /// Only secrets in these groups
        #[arg(long, value_delimiter = ',')]
        groups: Option<Vec<String>>,
        /// Case-insensitive match on name or labels
        #[arg(long)]
        search: Option<String>,
    },
    /// Create a new version of a secret (manual rotation)
    Rotate {
        #[arg(long)]
        id: String,
    },
}
