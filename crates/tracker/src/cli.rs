use analysis_core::LookbackPeriod;
use anyhow::{anyhow, bail, Context, Result};
use market_scanner::ExchangeFilter;

pub const PROFILES: &[&str] = &["T212", "Revolut", "Dida", "Sirbu", "Dividend", "Moldo_Watchlist"];
pub const MARKETS: &[&str] = &["us", "gb", "de", "es", "fr", "ch", "nl", "non-us"];
pub const DEFAULT_PROFILE: &str = "T212";

/// Parsed command line
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub profile: String,
    pub exchange: Option<ExchangeFilter>,
    /// Analyze this one ticker, print its table and exit
    pub ticker: Option<String>,
    pub last_day_only: bool,
    pub update_worksheet: bool,
    pub period: LookbackPeriod,
    pub use_cache: bool,
    pub alert: bool,
    pub concurrency: Option<usize>,
    pub help: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE.to_string(),
            exchange: None,
            ticker: None,
            last_day_only: false,
            update_worksheet: false,
            period: LookbackPeriod::Max,
            use_cache: false,
            alert: false,
            concurrency: None,
            help: false,
        }
    }
}

impl CliArgs {
    /// Parse the arguments that follow the program name
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut cli = CliArgs::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| anyhow!("{} expects a value", flag))
            };

            match arg.as_str() {
                "-h" | "--help" => cli.help = true,
                "-p" | "--profile" => {
                    let profile = value(arg)?;
                    cli.profile = PROFILES
                        .iter()
                        .find(|p| p.eq_ignore_ascii_case(&profile))
                        .map(|p| p.to_string())
                        .ok_or_else(|| anyhow!("Unknown profile {} (choose from {})", profile, PROFILES.join(", ")))?;
                }
                "-e" | "--exchange" => {
                    let code = value(arg)?.to_ascii_lowercase();
                    if !MARKETS.contains(&code.as_str()) {
                        bail!("Unknown exchange {} (choose from {})", code, MARKETS.join(", "));
                    }
                    cli.exchange = Some(ExchangeFilter::parse(&code)?);
                }
                "-t" | "--ticker" => {
                    let ticker = value(arg)?;
                    cli.ticker = Some(ticker.trim().to_string()).filter(|t| !t.is_empty());
                }
                "-l" | "--last-day-only" | "--last_day_only" => cli.last_day_only = true,
                "-u" | "--update-worksheet" | "--update_worksheet" => cli.update_worksheet = true,
                "-tp" | "--ticker-period" | "--ticker_period" => {
                    let raw = value(arg)?;
                    cli.period = LookbackPeriod::parse(&raw)
                        .with_context(|| format!("Invalid ticker period {}", raw))?;
                }
                "--cache" => cli.use_cache = true,
                "--alert" => cli.alert = true,
                "--concurrency" => {
                    let raw = value(arg)?;
                    let n: usize = raw
                        .parse()
                        .with_context(|| format!("Invalid concurrency {}", raw))?;
                    if n == 0 {
                        bail!("--concurrency must be at least 1");
                    }
                    cli.concurrency = Some(n);
                }
                other => bail!("Unknown argument {}", other),
            }
        }

        Ok(cli)
    }
}

pub fn usage() -> String {
    format!(
        "Usage: tracker [OPTIONS]

Options:
  -p, --profile NAME          Ticker sheet to use ({profiles}; default {default})
  -e, --exchange CODE         Only keep one market ({markets}; default all)
  -t, --ticker SYMBOL         Print the table of one ticker and exit
  -l, --last-day-only         Keep only the latest row per ticker, ranked by RSI
  -u, --update-worksheet      Write the snapshot next to the profile sheet
  -tp, --ticker-period P      History to request: max, ytd, Nd, Nwk, Nmo, Ny (default max)
      --cache                 Reuse the snapshot cache when it is fresh
      --alert                 Mail today's signals to the configured recipients
      --concurrency N         Max parallel ticker fetches
  -h, --help                  Show this message",
        profiles = PROFILES.join(", "),
        default = DEFAULT_PROFILE,
        markets = MARKETS.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        CliArgs::parse(&args)
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli, CliArgs::default());
        assert_eq!(cli.profile, "T212");
        assert_eq!(cli.period, LookbackPeriod::Max);
    }

    #[test]
    fn test_full_command_line() {
        let cli = parse(&[
            "-p", "dividend", "-e", "non-us", "-l", "-u", "-tp", "6mo", "--cache", "--alert",
            "--concurrency", "4",
        ])
        .unwrap();

        assert_eq!(cli.profile, "Dividend");
        assert_eq!(cli.exchange, Some(ExchangeFilter::NonUs));
        assert!(cli.last_day_only && cli.update_worksheet && cli.use_cache && cli.alert);
        assert_eq!(cli.period, LookbackPeriod::Months(6));
        assert_eq!(cli.concurrency, Some(4));
    }

    #[test]
    fn test_single_ticker_and_long_flags() {
        let cli = parse(&["--ticker", "VOD.L", "--ticker_period", "1y", "--last_day_only"]).unwrap();

        assert_eq!(cli.ticker.as_deref(), Some("VOD.L"));
        assert_eq!(cli.period, LookbackPeriod::Years(1));
        assert!(cli.last_day_only);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse(&["-p", "Nobody"]).is_err());
        assert!(parse(&["-e", "jp"]).is_err());
        assert!(parse(&["-tp", "forever"]).is_err());
        assert!(parse(&["--concurrency", "0"]).is_err());
        assert!(parse(&["--profile"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }

    #[test]
    fn test_usage_lists_choices() {
        let text = usage();
        assert!(text.contains("Moldo_Watchlist"));
        assert!(text.contains("non-us"));
    }
}
