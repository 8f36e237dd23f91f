//! Trust gate defaults. Values here seed `StaticSettings`; rows in
//! `ledger_settings` take precedence at runtime.

use clap::{
    builder::{BoolishValueParser, PossibleValuesParser},
    Arg, ArgAction, ArgMatches, Command,
};

use crate::ledger::settings::{
    StaticSettings, KEY_CHECK_REMOTE, KEY_COUNT_SCOPE, KEY_MAX_FAILURES,
    KEY_MAX_FAILURES_BY_REMOTE, KEY_RESET_ON_SUCCESS, KEY_WHITELIST_REMOTES, KEY_WINDOW_SECONDS,
};

pub const ARG_CHECK_REMOTE: &str = "check-remote";
pub const ARG_MAX_FAILURES: &str = "max-failures";
pub const ARG_MAX_FAILURES_BY_REMOTE: &str = "max-failures-by-remote";
pub const ARG_WINDOW_SECONDS: &str = "window-seconds";
pub const ARG_COUNT_SCOPE: &str = "count-scope";
pub const ARG_RESET_ON_SUCCESS: &str = "reset-on-success";
pub const ARG_WHITELIST_REMOTES: &str = "whitelist-remotes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub check_remote: bool,
    pub max_failures: i64,
    pub max_failures_by_remote: i64,
    pub window_seconds: u64,
    pub count_scope: String,
    pub reset_on_success: bool,
    pub whitelist_remotes: Option<String>,
}

impl Options {
    /// Parse trust gate arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            check_remote: matches
                .get_one::<bool>(ARG_CHECK_REMOTE)
                .copied()
                .unwrap_or(true),
            max_failures: matches
                .get_one::<i64>(ARG_MAX_FAILURES)
                .copied()
                .unwrap_or(10),
            max_failures_by_remote: matches
                .get_one::<i64>(ARG_MAX_FAILURES_BY_REMOTE)
                .copied()
                .unwrap_or(50),
            window_seconds: matches
                .get_one::<u64>(ARG_WINDOW_SECONDS)
                .copied()
                .unwrap_or(3600),
            count_scope: required(ARG_COUNT_SCOPE)?,
            reset_on_success: matches
                .get_one::<bool>(ARG_RESET_ON_SUCCESS)
                .copied()
                .unwrap_or(true),
            whitelist_remotes: matches
                .get_one::<String>(ARG_WHITELIST_REMOTES)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
        })
    }

    #[must_use]
    pub fn to_settings(&self) -> StaticSettings {
        let settings = StaticSettings::new()
            .with(KEY_CHECK_REMOTE, self.check_remote.to_string())
            .with(KEY_MAX_FAILURES, self.max_failures.to_string())
            .with(KEY_MAX_FAILURES_BY_REMOTE, self.max_failures_by_remote.to_string())
            .with(KEY_WINDOW_SECONDS, self.window_seconds.to_string())
            .with(KEY_COUNT_SCOPE, self.count_scope.clone())
            .with(KEY_RESET_ON_SUCCESS, self.reset_on_success.to_string());
        if let Some(remotes) = &self.whitelist_remotes {
            settings.set(KEY_WHITELIST_REMOTES, remotes.clone());
        }
        settings
    }
}

fn boolish(name: &'static str, env: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .num_args(0..=1)
        .default_value("true")
        .default_missing_value("true")
        .action(ArgAction::Set)
        .value_parser(BoolishValueParser::new())
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(boolish(
            ARG_CHECK_REMOTE,
            "TUTELA_CHECK_REMOTE",
            "Refuse logins from remotes with too many recent failures",
        ))
        .arg(
            Arg::new(ARG_MAX_FAILURES)
                .long(ARG_MAX_FAILURES)
                .help("Failed attempts per count scope before refusing (0 disables)")
                .env("TUTELA_MAX_FAILURES")
                .default_value("10")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
        .arg(
            Arg::new(ARG_MAX_FAILURES_BY_REMOTE)
                .long(ARG_MAX_FAILURES_BY_REMOTE)
                .help("Failed attempts per remote, across logins, before refusing (0 disables)")
                .env("TUTELA_MAX_FAILURES_BY_REMOTE")
                .default_value("50")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
        .arg(
            Arg::new(ARG_WINDOW_SECONDS)
                .long(ARG_WINDOW_SECONDS)
                .help("How far back failed attempts are counted, in seconds")
                .env("TUTELA_WINDOW_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_COUNT_SCOPE)
                .long(ARG_COUNT_SCOPE)
                .help("Which attempts count toward --max-failures")
                .long_help(
                    "Which attempts count toward --max-failures.\n\nremote_login: same remote and same login\nremote: any login from the same remote\nlogin: the same login from any remote",
                )
                .env("TUTELA_COUNT_SCOPE")
                .default_value("remote_login")
                .value_parser(PossibleValuesParser::new(["remote_login", "remote", "login"])),
        )
        .arg(boolish(
            ARG_RESET_ON_SUCCESS,
            "TUTELA_RESET_ON_SUCCESS",
            "Only count failures after the latest successful login",
        ))
        .arg(
            Arg::new(ARG_WHITELIST_REMOTES)
                .long(ARG_WHITELIST_REMOTES)
                .help("Comma separated remotes that are always trusted")
                .env("TUTELA_WHITELIST_REMOTES"),
        )
}
