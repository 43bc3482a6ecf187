use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "drawchat")]
#[command(about = "Manage drawchat conversations and diagram history from the terminal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local conversation store
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to store configuration JSON
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// CLI profile name for remote sync configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new conversation and make it current
    New,
    /// List conversations, newest first
    List {
        /// Number of conversations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a conversation transcript and its current diagram
    Show {
        /// Conversation ID or unique prefix (current conversation when omitted)
        id: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Make a conversation current
    Switch {
        /// Conversation ID or unique prefix
        id: String,
    },
    /// Append a user message to a conversation
    Send {
        /// Message text
        content: Vec<String>,
        /// Conversation ID or unique prefix (current conversation when omitted)
        #[arg(long, value_name = "ID")]
        id: Option<String>,
    },
    /// Record a diagram as a new version
    Draw {
        /// File holding the diagram XML (stdin when omitted)
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
        /// Conversation ID or unique prefix (current conversation when omitted)
        #[arg(long, value_name = "ID")]
        id: Option<String>,
        /// Version label
        #[arg(long, default_value = "display_diagram")]
        label: String,
    },
    /// Set or clear a conversation title
    Rename {
        /// Conversation ID or unique prefix
        id: String,
        /// New title (clears the title when omitted)
        title: Vec<String>,
    },
    /// Delete a conversation
    Delete {
        /// Conversation ID or unique prefix
        id: String,
    },
    /// Step the diagram back one version
    Undo {
        /// Conversation ID or unique prefix (current conversation when omitted)
        id: Option<String>,
    },
    /// Step the diagram forward one version
    Redo {
        /// Conversation ID or unique prefix (current conversation when omitted)
        id: Option<String>,
    },
    /// Drop every message after an index and restore its diagram
    Rewind {
        /// Message index to keep as the last message
        message_index: usize,
        /// Conversation ID or unique prefix (current conversation when omitted)
        #[arg(long, value_name = "ID")]
        id: Option<String>,
    },
    /// Inspect or clean the local conversation cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Sync conversations with the remote store
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Export conversations
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Import conversation data left by older versions
    Migrate,
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Markdown,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache occupancy
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Evict stale and over-quota conversations
    Cleanup,
    /// Delete the least-recently-updated conversation
    DeleteOldest,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Run sync in the foreground until interrupted
    Watch,
    /// Fetch an evicted conversation back from the remote store
    Restore {
        /// Conversation ID or unique prefix
        id: String,
    },
    /// List recently rejected remote changes
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Remote store base URL
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,
        /// Account the access token belongs to
        #[arg(long, value_name = "ID")]
        user_id: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Show the resolved profile
    Show {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}
