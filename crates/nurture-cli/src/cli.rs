use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use nurture_core::models::{EnrollmentStatus, FlowStatus};
use std::path::PathBuf;

pub use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "nurture")]
#[command(version, about = "Nurture - lifecycle marketing automation engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Database path (defaults to ~/.nurture/nurture.db)
    #[arg(long, global = true, env = "NURTURE_DB_PATH")]
    pub db_path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Flow management
    Flow {
        #[command(subcommand)]
        command: FlowCommands,
    },

    /// Event intake
    Event {
        #[command(subcommand)]
        command: EventCommands,
    },

    /// User profiles and lifecycle signals
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Fire manual and webhook triggers
    Trigger {
        #[command(subcommand)]
        command: TriggerCommands,
    },

    /// Inspect enrollments
    Enrollment {
        #[command(subcommand)]
        command: EnrollmentCommands,
    },

    /// Engine configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run one scheduler pass and exit
    Tick,

    /// Run the scheduler loop until interrupted
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Override the configured poll interval
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum FlowStatusArg {
    Draft,
    Active,
    Paused,
    Archived,
}

impl From<FlowStatusArg> for FlowStatus {
    fn from(value: FlowStatusArg) -> Self {
        match value {
            FlowStatusArg::Draft => FlowStatus::Draft,
            FlowStatusArg::Active => FlowStatus::Active,
            FlowStatusArg::Paused => FlowStatus::Paused,
            FlowStatusArg::Archived => FlowStatus::Archived,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum EnrollmentStatusArg {
    Active,
    Completed,
    Exited,
    Error,
}

impl From<EnrollmentStatusArg> for EnrollmentStatus {
    fn from(value: EnrollmentStatusArg) -> Self {
        match value {
            EnrollmentStatusArg::Active => EnrollmentStatus::Active,
            EnrollmentStatusArg::Completed => EnrollmentStatus::Completed,
            EnrollmentStatusArg::Exited => EnrollmentStatus::Exited,
            EnrollmentStatusArg::Error => EnrollmentStatus::Error,
        }
    }
}

#[derive(Subcommand)]
pub enum FlowCommands {
    /// List flows
    List {
        #[arg(long, value_enum)]
        status: Option<FlowStatusArg>,
    },

    /// Show flow details and metrics
    Show { id: String },

    /// Create a flow
    Create { name: String },

    /// Import a flow definition from a JSON file (creates or overwrites)
    Import { file: PathBuf },

    /// Export a flow definition as JSON
    Export { id: String },

    /// Validate a stored flow or a definition file
    Validate {
        #[arg(required_unless_present = "file")]
        id: Option<String>,

        #[arg(long, conflicts_with = "id")]
        file: Option<PathBuf>,
    },

    /// Activate a draft or paused flow
    Activate { id: String },

    /// Pause an active flow
    Pause { id: String },

    /// Resume a paused flow
    Resume { id: String },

    /// Archive a flow and exit its open enrollments
    Archive { id: String },

    /// Copy a flow as a new draft
    Duplicate { id: String },

    /// Delete a flow with its enrollments
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum EventCommands {
    /// Ingest a single event
    Ingest {
        user_id: String,
        event: String,

        /// Idempotency key (generated when omitted)
        #[arg(long)]
        message_id: Option<String>,

        #[arg(long)]
        account_id: Option<String>,

        /// Event property as key=value; values are parsed as JSON when possible
        #[arg(short, long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
    },

    /// Ingest a batch from a file holding a JSON array or JSON lines
    IngestFile { file: PathBuf },

    /// Show the most recent events
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create or update a user profile
    Upsert {
        user_id: String,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        account_id: Option<String>,

        /// Profile property as key=value; values are parsed as JSON when possible
        #[arg(short, long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,

        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Show a user profile
    Show { user_id: String },

    /// Set a lifecycle state and fire lifecycle triggers
    Lifecycle { user_id: String, state: String },

    /// Add a user to a segment, or remove with --leave
    Segment {
        user_id: String,
        segment_id: String,

        #[arg(long)]
        leave: bool,
    },
}

#[derive(Subcommand)]
pub enum TriggerCommands {
    /// Enroll a user into a flow with a manual trigger
    Manual { flow_id: String, user_id: String },

    /// Deliver a webhook payload
    Webhook {
        path: String,
        user_id: String,

        /// JSON object payload
        #[arg(long)]
        payload: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum EnrollmentCommands {
    /// List enrollments of a flow or a user
    List {
        #[arg(long, required_unless_present = "user", conflicts_with = "user")]
        flow: Option<String>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long, value_enum)]
        status: Option<EnrollmentStatusArg>,
    },

    /// Show an enrollment
    Show { id: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the engine configuration
    Show,

    /// Set one configuration field
    Set { key: String, value: String },
}
