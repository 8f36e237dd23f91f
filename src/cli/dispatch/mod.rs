//! Maps validated CLI arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{http, ledger};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let ledger_opts = ledger::Options::parse(matches)?;
    let http_opts = http::Options::parse(matches);

    if let Some(geo_url) = &http_opts.geo_url {
        url::Url::parse(geo_url).context("invalid TUTELA_GEO_URL")?;
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        ledger: ledger_opts,
        geo_url: http_opts.geo_url,
        trust_proxy_headers: http_opts.trust_proxy_headers,
        admin_token: http_opts.admin_token,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_action_from_args() {
        temp_env::with_vars(
            [
                ("TUTELA_GEO_URL", None::<&str>),
                ("TUTELA_MAX_FAILURES", None),
                ("TUTELA_PORT", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec![
                    "tutela",
                    "--dsn",
                    "postgres://user@localhost:5432/tutela",
                    "--max-failures",
                    "5",
                ]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.ledger.max_failures, 5);
                    assert!(args.geo_url.is_none());
                }
            },
        );
    }

    #[test]
    fn invalid_geo_url_is_rejected() {
        temp_env::with_vars([("TUTELA_GEO_URL", Some("not a url"))], || {
            let matches = crate::cli::commands::new()
                .get_matches_from(vec!["tutela", "--dsn", "postgres://localhost/tutela"]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("invalid TUTELA_GEO_URL"));
            }
        });
    }
}
