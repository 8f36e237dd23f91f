use crate::api::{self, ServerOptions};
use crate::cli::commands::ledger;
use anyhow::Result;
use secrecy::SecretString;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub ledger: ledger::Options,
    pub geo_url: Option<String>,
    pub trust_proxy_headers: bool,
    pub admin_token: Option<SecretString>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let defaults = args.ledger.to_settings();

    api::new(
        args.port,
        args.dsn,
        defaults,
        ServerOptions {
            geo_url: args.geo_url,
            trust_proxy_headers: args.trust_proxy_headers,
            admin_token: args.admin_token,
        },
    )
    .await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("check_remote", args.ledger.check_remote.to_string()),
        ("max_failures", args.ledger.max_failures.to_string()),
        (
            "max_failures_by_remote",
            args.ledger.max_failures_by_remote.to_string(),
        ),
        ("window_seconds", args.ledger.window_seconds.to_string()),
        ("count_scope", args.ledger.count_scope.clone()),
        ("reset_on_success", args.ledger.reset_on_success.to_string()),
        (
            "whitelist_remotes",
            args.ledger
                .whitelist_remotes
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
        (
            "geo_url",
            args.geo_url.clone().unwrap_or_else(|| "disabled".to_string()),
        ),
        ("trust_proxy_headers", args.trust_proxy_headers.to_string()),
        ("admin_routes", args.admin_token.is_some().to_string()),
    ];
    info!("{}", startup_message("Startup configuration", &entries));
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn startup_message(title: &str, entries: &[(&str, String)]) -> String {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "tutela {} - {}\n\n{title}:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    message
}

fn short_commit(hash: &str) -> String {
    hash.trim().chars().take(7).collect()
}
