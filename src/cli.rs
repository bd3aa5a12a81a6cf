use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forseti")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Zero-downtime deployments for autoscaled server fleets", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true, env = "FORSETI_CONFIG")]
    pub config: Option<PathBuf>,

    /// AWS region
    #[arg(long, global = true, env = "AWS_REGION")]
    pub region: Option<String>,

    /// AWS named profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build an image and roll the application's group onto it
    Deploy(DeployArgs),

    /// Show the application's autoscale group
    Status(StatusArgs),

    /// List launch configurations, oldest first
    ListConfigurations {
        /// Application (default: every configured application)
        app: Option<String>,
    },

    /// Delete old launch configurations and their images
    CleanupConfigurations(CleanupArgs),

    /// Replace every instance with a fresh one from the current launch configuration
    Regenerate {
        /// Application name
        app: String,
    },

    /// Resume suspended scaling processes after an interrupted run
    Resume {
        /// Application name
        app: String,
    },

    /// Enter or leave maintenance mode
    #[command(subcommand)]
    Maintenance(MaintenanceCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Deploy
// ============================================================================

#[derive(Args)]
pub struct DeployArgs {
    /// Application name
    pub app: String,

    /// Use this image instead of building one
    #[arg(long, value_name = "IMAGE_ID")]
    pub ami: Option<String>,

    /// Extra arguments appended to the provision command
    #[arg(last = true)]
    pub args: Vec<String>,
}

// ============================================================================
// Status
// ============================================================================

#[derive(Args)]
pub struct StatusArgs {
    /// Application name
    pub app: String,

    /// Redraw until interrupted
    #[arg(short, long)]
    pub watch: bool,

    /// Seconds between redraws with --watch
    #[arg(long, default_value = "5")]
    pub interval: u64,

    /// Number of recent scaling activities to show
    #[arg(short, long, default_value = "3")]
    pub activities: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "tree")]
    pub format: StatusFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StatusFormat {
    Plain,
    Json,
    Tree,
}

// ============================================================================
// Cleanup
// ============================================================================

#[derive(Args)]
pub struct CleanupArgs {
    /// Application (default: every configured application)
    pub app: Option<String>,

    /// Number of launch configurations to keep
    #[arg(short, long, default_value = "4")]
    pub keep: usize,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Maintenance
// ============================================================================

#[derive(Subcommand)]
pub enum MaintenanceCommand {
    /// Suspend scaling and run the maintenance_on hook
    On {
        /// Application name
        app: String,
    },
    /// Resume scaling and run the maintenance_off hook
    Off {
        /// Application name
        app: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_collects_trailing_args() {
        let cli = Cli::parse_from([
            "forseti", "deploy", "web", "--ami", "ami-1", "--", "--limit", "web servers",
        ]);
        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.app, "web");
        assert_eq!(args.ami.as_deref(), Some("ami-1"));
        assert_eq!(args.args, vec!["--limit", "web servers"]);
    }

    #[test]
    fn test_status_defaults() {
        let cli = Cli::parse_from(["forseti", "status", "web"]);
        let Command::Status(args) = cli.command else {
            panic!("expected status");
        };
        assert!(!args.watch);
        assert_eq!(args.activities, 3);
        assert_eq!(args.format, StatusFormat::Tree);
    }

    #[test]
    fn test_cleanup_defaults_to_keeping_four() {
        let cli = Cli::parse_from(["forseti", "cleanup-configurations"]);
        let Command::CleanupConfigurations(args) = cli.command else {
            panic!("expected cleanup-configurations");
        };
        assert!(args.app.is_none());
        assert_eq!(args.keep, 4);
        assert!(!args.yes);
    }
}
