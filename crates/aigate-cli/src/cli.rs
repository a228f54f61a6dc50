//! CLI argument definitions for aigate.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `invoke` | Run one capability through the gateway |
//! | `health` | Print breaker and rate-limit health |
//! | `providers` | List configured providers and their policies |
//! | `config check` | Load and validate a configuration file |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | Path to `aigate.toml`; the built-in demo config is used when absent |
//! | `--mock` | `false` | Replace every provider with an offline scripted provider |
//! | `--mock-outage` | `false` | Scripted providers that always fail (degraded mode) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! aigate invoke classify "Streetlight out on Elm Street" --pretty
//! aigate invoke sentiment "thanks for fixing the road" --option priority=high
//! aigate --mock-outage invoke improve-text "i saw it  yesterday" --trace
//! aigate --mock-outage health --watch-secs 300 --sla-secs 60
//! aigate --config aigate.toml config check
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// aigate - resilient gateway for external AI providers
#[derive(Debug, Parser)]
#[command(
    name = "aigate",
    author,
    version,
    about = "Resilient gateway for external AI providers",
    long_about = "aigate routes text and speech requests to external AI providers behind \
circuit breakers and rate limits, caches results, and falls back to a local \
deterministic answer when every provider is unavailable.\n\
\n\
Use 'aigate <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Serve every configured provider from an offline scripted provider.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Like `--mock`, but every provider fails so results come from local fallback.
    #[arg(long, global = true, default_value_t = false)]
    pub mock_outage: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Invoke a capability.
    ///
    /// # Examples
    ///
    ///   aigate invoke classify "Broken water main on 5th Avenue"
    ///   aigate invoke summarize "..." --option max_sentences=1
    ///   aigate invoke speech-to-text --audio-file note.mp3 --option language=en
    Invoke(InvokeArgs),

    /// Print provider health (breaker state, rate-limit budgets, stuck circuits).
    Health(HealthArgs),

    /// List providers in routing order with their policies.
    Providers,

    /// Configuration commands.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct InvokeArgs {
    /// Capability name (improve-text, classify, sentiment, summarize,
    /// speech-to-text, text-to-speech).
    pub capability: String,

    /// Text payload.
    #[arg(required_unless_present = "audio_file", conflicts_with = "audio_file")]
    pub text: Option<String>,

    /// Read an audio payload from this file.
    #[arg(long)]
    pub audio_file: Option<PathBuf>,

    /// Invocation option as key=value (repeatable), e.g. priority=high, cache=bypass.
    #[arg(long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Caller deadline in milliseconds.
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// Include the per-provider attempt trail.
    #[arg(long, default_value_t = false)]
    pub trace: bool,
}

#[derive(Debug, Args)]
pub struct HealthArgs {
    /// Report circuits away from closed for longer than this many seconds.
    #[arg(long)]
    pub sla_secs: Option<u64>,

    /// Run the health monitor for this many seconds (or until Ctrl-C),
    /// alerting at the configured interval, then print the report.
    #[arg(long)]
    pub watch_secs: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Load and validate the configuration, then print a summary.
    Check,
}
