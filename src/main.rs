use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ratewindow::config::RateWindowConfig;
use ratewindow::ratelimit::{admit_with, LimiterContext};

const EXIT_ALLOWED: u8 = 0;
/// Exit status when a check is rejected.
const EXIT_REJECTED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "ratewindow", version)]
#[command(about = "Per-key fixed-window request limiter")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count one request for a key and print the decision
    Check {
        /// Caller identifier; omitted or empty means the guest key
        #[arg(short, long)]
        key: Option<String>,

        /// Requests allowed per window
        #[arg(short, long, conflicts_with = "scope")]
        limit: Option<u64>,

        /// Configured scope supplying the limit
        #[arg(short, long)]
        scope: Option<String>,
    },
    /// Print the persisted window for a key without counting
    Show {
        #[arg(short, long)]
        key: Option<String>,

        #[arg(short, long)]
        scope: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = RateWindowConfig::load(cli.config.as_deref())?;
    debug!(
        backend = ?config.storage.backend,
        dir = %config.storage.dir.display(),
        window_secs = config.limiting.window_secs,
        "Configuration loaded"
    );

    let ctx = LimiterContext::from_config(&config);
    let mut stdout = std::io::stdout().lock();
    let code = run(&ctx, cli.command, &mut stdout).await?;
    Ok(ExitCode::from(code))
}

/// Execute one subcommand, writing its JSON to `out`; returns the exit status.
async fn run(ctx: &LimiterContext, command: Command, out: &mut impl Write) -> anyhow::Result<u8> {
    match command {
        Command::Check { key, limit, scope } => {
            let key = key.as_deref();
            let limiter = match (limit, scope.as_deref()) {
                (Some(limit), _) => ctx.limiter(key, limit)?,
                (None, Some(scope)) => ctx.limiter_for_scope(key, scope)?,
                (None, None) => ctx.default_limiter(key)?,
            };

            let admission = admit_with(&limiter).await?;
            info!(
                key = %limiter.key(),
                allowed = admission.is_allowed(),
                count = admission.window().count,
                limit = limiter.limit(),
                "Rate limit decision made"
            );

            writeln!(out, "{}", serde_json::to_string_pretty(&admission.to_json())?)?;

            if admission.is_allowed() {
                Ok(EXIT_ALLOWED)
            } else {
                Ok(EXIT_REJECTED)
            }
        }
        Command::Show { key, scope } => {
            let limiter = match scope.as_deref() {
                Some(scope) => ctx.limiter_for_scope(key.as_deref(), scope)?,
                None => ctx.default_limiter(key.as_deref())?,
            };

            let window = limiter.peek().await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&window)?)?;
            Ok(EXIT_ALLOWED)
        }
    }
}

/// Initialize tracing, honouring `RUST_LOG` and defaulting to `info`.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewindow::clock::ManualClock;
    use ratewindow::store::MemoryStore;
    use std::sync::Arc;

    fn context() -> LimiterContext {
        let config = RateWindowConfig::from_yaml(
            "storage:\n  backend: memory\nscopes:\n  ai_chat:\n    limit: 1\n    namespace: chat\n",
        )
        .unwrap();
        LimiterContext::from_config(&config).with_clock(Arc::new(ManualClock::new(1_000)))
    }

    fn command(args: &[&str]) -> Command {
        let mut argv = vec!["ratewindow"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    async fn run_json(ctx: &LimiterContext, args: &[&str]) -> (u8, serde_json::Value) {
        let mut out = Vec::new();
        let code = run(ctx, command(args), &mut out).await.unwrap();
        (code, serde_json::from_slice(&out).unwrap())
    }

    #[tokio::test]
    async fn test_check_exit_codes() {
        let ctx = context();
        let args = ["check", "--key", "sess1", "--limit", "1"];

        let (code, json) = run_json(&ctx, &args).await;
        assert_eq!(code, EXIT_ALLOWED);
        assert_eq!(json["allowed"], true);

        let (code, json) = run_json(&ctx, &args).await;
        assert_eq!(code, EXIT_REJECTED);
        assert_eq!(json["status"], 429);
        assert_eq!(json["body"]["error"], "rate_limited");
    }

    #[tokio::test]
    async fn test_check_with_scope() {
        let ctx = context();
        let args = ["check", "--key", "sess1", "--scope", "ai_chat"];

        assert_eq!(run_json(&ctx, &args).await.0, EXIT_ALLOWED);
        assert_eq!(run_json(&ctx, &args).await.0, EXIT_REJECTED);

        let mut out = Vec::new();
        let err = run(&ctx, command(&["check", "--scope", "missing"]), &mut out).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_show_does_not_count() {
        let ctx = context();

        let (code, json) = run_json(&ctx, &["show", "--key", "sess1"]).await;
        assert_eq!(code, EXIT_ALLOWED);
        assert!(json.is_null());

        run_json(&ctx, &["check", "--key", "sess1"]).await;

        let (_, json) = run_json(&ctx, &["show", "--key", "sess1"]).await;
        assert_eq!(json["c"], 1);
        assert_eq!(json["t"], 1_000);
        let (_, json) = run_json(&ctx, &["show", "--key", "sess1"]).await;
        assert_eq!(json["c"], 1);
    }

    #[test]
    fn test_limit_and_scope_conflict() {
        let parsed = Cli::try_parse_from(["ratewindow", "check", "--limit", "1", "--scope", "a"]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_missing_and_empty_keys_share_guest_window() {
        let ctx = LimiterContext::new(Arc::new(MemoryStore::new()))
            .with_clock(Arc::new(ManualClock::new(1_000)));
        let (code, _) = run_json(&ctx, &["check", "--limit", "1"]).await;
        assert_eq!(code, EXIT_ALLOWED);
        let (code, _) = run_json(&ctx, &["check", "--key", "", "--limit", "1"]).await;
        assert_eq!(code, EXIT_REJECTED);
    }
}
