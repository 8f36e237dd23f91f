use clap::{builder::BoolishValueParser, Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_GEO_URL: &str = "geo-url";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";
pub const ARG_ADMIN_TOKEN: &str = "admin-token";

#[derive(Debug, Clone)]
pub struct Options {
    pub geo_url: Option<String>,
    pub trust_proxy_headers: bool,
    pub admin_token: Option<SecretString>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Self {
            geo_url: get_non_empty(ARG_GEO_URL),
            trust_proxy_headers: matches
                .get_one::<bool>(ARG_TRUST_PROXY_HEADERS)
                .copied()
                .unwrap_or(false),
            admin_token: get_non_empty(ARG_ADMIN_TOKEN).map(SecretString::from),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GEO_URL)
                .long(ARG_GEO_URL)
                .help("ip-api.com compatible endpoint used to annotate attempts")
                .long_help(
                    "ip-api.com compatible endpoint used to annotate attempts, e.g. http://ip-api.com/json/\n\nThe remote address is appended to the URL. Only globally routable addresses are sent.",
                )
                .env("TUTELA_GEO_URL"),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Take the remote address from X-Forwarded-For / X-Real-IP")
                .env("TUTELA_TRUST_PROXY_HEADERS")
                .num_args(0..=1)
                .default_value("false")
                .default_missing_value("true")
                .action(ArgAction::Set)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_ADMIN_TOKEN)
                .long(ARG_ADMIN_TOKEN)
                .help("Token required in X-Tutela-Admin-Token for admin routes")
                .long_help(
                    "Token required in the X-Tutela-Admin-Token header for the attempt and trust list routes.\n\nAdmin routes answer 404 when no token is configured.",
                )
                .env("TUTELA_ADMIN_TOKEN")
                .hide_env_values(true),
        )
}
