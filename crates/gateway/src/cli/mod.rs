pub mod ask;
pub mod config;

use clap::{Args, Parser, Subcommand};

/// Threadline: a streaming chat gateway with conversation continuity.
#[derive(Debug, Parser)]
#[command(name = "threadline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Ask one question and print the answer.
    Ask(AskArgs),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Clone, Args)]
pub struct AskArgs {
    /// The question to send.
    pub question: String,
    /// Continue this thread instead of the session's stored one.
    #[arg(long, conflicts_with = "no_reuse_thread")]
    pub thread_id: Option<String>,
    /// Start a fresh thread for this session.
    #[arg(long)]
    pub no_reuse_thread: bool,
    /// Print the answer as it arrives.
    #[arg(long)]
    pub stream: bool,
    /// Output the result as JSON instead of plain text.
    #[arg(long, conflicts_with = "stream")]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `TL_CONFIG` (or
/// `config.toml` by default). Returns the parsed [`Config`] and the
/// path that was used.
///
/// [`Config`]: tl_domain::config::Config
pub fn load_config() -> anyhow::Result<(tl_domain::config::Config, String)> {
    let config_path = std::env::var("TL_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        tl_domain::config::Config::default()
    };

    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_flags_parse() {
        let cli = Cli::try_parse_from(["threadline", "ask", "hi", "--no-reuse-thread", "--stream"])
            .unwrap();
        match cli.command {
            Some(Command::Ask(a)) => {
                assert_eq!(a.question, "hi");
                assert!(a.no_reuse_thread && a.stream && !a.json);
                assert!(a.thread_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn thread_id_conflicts_with_no_reuse() {
        assert!(Cli::try_parse_from([
            "threadline",
            "ask",
            "hi",
            "--thread-id",
            "t1",
            "--no-reuse-thread"
        ])
        .is_err());
    }

    #[test]
    fn no_subcommand_means_serve() {
        assert!(Cli::try_parse_from(["threadline"]).unwrap().command.is_none());
    }
}
