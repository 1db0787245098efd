//! adsbcot: ADS-B feed to Cursor-on-Target gateway.
//!
//! Every option is also read from the environment variable named in its
//! help text, so the gateway can be configured entirely from a unit file or
//! container environment.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::Parser;
use tracing::{error, info};

use adsbcot_core::config::{altitude_bound, DEFAULT_COT_ACCESS, DEFAULT_COT_STALE};
use adsbcot_core::{CotConfig, KnownCraftRegistry, UidKey};

mod coordinator;
mod error;
mod feed;
mod logging;
mod pipeline;
mod sink;

use coordinator::{Coordinator, STATS_INTERVAL};
use error::Result;
use feed::{FeedSettings, FeedUrl, DEFAULT_POLL_INTERVAL, DEFAULT_RAPIDAPI_HOST, DEFAULT_TCP_MAX_RETRIES};
use pipeline::{PipelineState, QueuePolicy};
use sink::{SinkTarget, DEFAULT_COT_URL};

#[derive(Parser, Debug)]
#[command(
    name = "adsbcot",
    version,
    about = "Bridge ADS-B feeds to Cursor-on-Target events"
)]
struct Cli {
    /// Feed URLs, comma separated: http(s)://, file://, ws(s)://, tcp[+raw|+beast]://
    #[arg(long, env = "FEED_URL", value_delimiter = ',', required = true)]
    feed_url: Vec<String>,

    /// Seconds between HTTP polls or file re-reads
    #[arg(long, env = "POLL_INTERVAL", default_value_t = DEFAULT_POLL_INTERVAL)]
    poll_interval: u64,

    /// Seconds until an emitted event goes stale
    #[arg(long, env = "COT_STALE", default_value_t = DEFAULT_COT_STALE)]
    cot_stale: u64,

    /// UID source: ICAO, REG or FLIGHT
    #[arg(long, env = "UID_KEY", default_value = "ICAO")]
    uid_key: UidKey,

    /// Known-craft CSV; only listed craft are emitted unless INCLUDE_ALL_CRAFT is set
    #[arg(long, env = "KNOWN_CRAFT")]
    known_craft: Option<PathBuf>,

    /// Emit TIS-B targets
    #[arg(long, env = "INCLUDE_TISB", default_value_t = false, num_args = 0..=1,
          default_missing_value = "true", value_parser = BoolishValueParser::new())]
    include_tisb: bool,

    /// Emit only TIS-B targets
    #[arg(long, env = "TISB_ONLY", default_value_t = false, num_args = 0..=1,
          default_missing_value = "true", value_parser = BoolishValueParser::new())]
    tisb_only: bool,

    /// Emit craft missing from the known-craft list too
    #[arg(long, env = "INCLUDE_ALL_CRAFT", default_value_t = false, num_args = 0..=1,
          default_missing_value = "true", value_parser = BoolishValueParser::new())]
    include_all_craft: bool,

    /// Geometric altitude ceiling in feet (0 = none)
    #[arg(long, env = "ALT_UPPER", default_value_t = 0.0)]
    alt_upper: f64,

    /// Geometric altitude floor in feet (0 = none)
    #[arg(long, env = "ALT_LOWER", default_value_t = 0.0)]
    alt_lower: f64,

    /// Host identifier in each event [default: adsbcot@<hostname>]
    #[arg(long, env = "COT_HOST_ID")]
    cot_host_id: Option<String>,

    /// CoT destination: tcp://host:port, udp://host:port or stdout:
    #[arg(long, env = "COT_URL", default_value = DEFAULT_COT_URL)]
    cot_url: String,

    /// Event access attribute
    #[arg(long, env = "COT_ACCESS", default_value = DEFAULT_COT_ACCESS)]
    cot_access: String,

    /// API key for HTTP feeds
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Host header for RapidAPI feeds
    #[arg(long, env = "RAPIDAPI_HOST", default_value = DEFAULT_RAPIDAPI_HOST)]
    rapidapi_host: String,

    /// Re-read file feeds when they change instead of on an interval
    #[arg(long, env = "FILE_WATCH", default_value_t = false, num_args = 0..=1,
          default_missing_value = "true", value_parser = BoolishValueParser::new())]
    file_watch: bool,

    /// Output queue capacity in events
    #[arg(long, env = "QUEUE_SIZE", default_value_t = 1000)]
    queue_size: usize,

    /// What to do when the output queue is full
    #[arg(long, env = "QUEUE_POLICY", value_enum, default_value_t = QueuePolicy::Block)]
    queue_policy: QueuePolicy,

    /// Reconnect attempts for raw TCP feeds before giving up (0 = fail at once)
    #[arg(long, env = "TCP_MAX_RETRIES", default_value_t = DEFAULT_TCP_MAX_RETRIES)]
    tcp_max_retries: u32,

    /// Seconds an altitude reference stays usable (0 = forever)
    #[arg(long, env = "ALT_CACHE_TTL", default_value_t = 600)]
    alt_cache_ttl: u64,

    /// Debug logging
    #[arg(long, env = "DEBUG", default_value_t = false, num_args = 0..=1,
          default_missing_value = "true", value_parser = BoolishValueParser::new())]
    debug: bool,
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Cli {
    fn cot_config(&self) -> Result<CotConfig> {
        let config = CotConfig {
            stale_secs: self.cot_stale,
            uid_key: self.uid_key,
            include_tisb: self.include_tisb,
            tisb_only: self.tisb_only,
            include_all_craft: self.include_all_craft,
            alt_upper: altitude_bound(self.alt_upper),
            alt_lower: altitude_bound(self.alt_lower),
            cot_host_id: self
                .cot_host_id
                .clone()
                .unwrap_or_else(|| format!("adsbcot@{}", hostname())),
            cot_access: self.cot_access.clone(),
            feed_url: None,
        };
        config.validate()?;
        Ok(config)
    }

    fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            poll_interval: Duration::from_secs(self.poll_interval.max(1)),
            api_key: self.api_key.clone(),
            rapidapi_host: self.rapidapi_host.clone(),
            file_watch: self.file_watch,
            tcp_max_retries: self.tcp_max_retries,
        }
    }

    /// Resolve every option into the coordinator.
    fn build(&self) -> Result<Coordinator> {
        let feeds = self
            .feed_url
            .iter()
            .filter(|u| !u.trim().is_empty())
            .map(|u| FeedUrl::parse(u))
            .collect::<Result<Vec<_>>>()?;

        let registry = self
            .known_craft
            .as_deref()
            .map(KnownCraftRegistry::load)
            .transpose()?;
        let altitude_ttl = (self.alt_cache_ttl > 0).then_some(self.alt_cache_ttl as f64);

        Ok(Coordinator {
            feeds,
            settings: self.feed_settings(),
            config: self.cot_config()?,
            sink: SinkTarget::parse(&self.cot_url)?,
            queue_size: self.queue_size,
            policy: self.queue_policy,
            state: Arc::new(PipelineState::new(registry, altitude_ttl)),
            stats_interval: STATS_INTERVAL,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let coordinator = match cli.build() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match coordinator.run().await {
        Ok(()) => {
            info!("adsbcot stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "adsbcot failed");
            ExitCode::FAILURE
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["adsbcot"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--feed-url", "http://localhost/data/aircraft.json"]);
        assert_eq!(cli.poll_interval, 3);
        assert_eq!(cli.cot_stale, 120);
        assert_eq!(cli.uid_key, UidKey::Icao);
        assert_eq!(cli.queue_size, 1000);
        assert_eq!(cli.queue_policy, QueuePolicy::Block);
        assert!(!cli.include_tisb);

        let config = cli.cot_config().unwrap();
        assert!(config.alt_upper.is_none());
        assert!(config.cot_host_id.starts_with("adsbcot@"));
        assert_eq!(config.cot_access, "Undefined");
    }

    #[test]
    fn test_feed_url_list() {
        let cli = parse(&[
            "--feed-url",
            "http://a/aircraft.json,tcp+beast://piaware",
            "--cot-url",
            "stdout:",
        ]);
        let coordinator = cli.build().unwrap();
        assert_eq!(coordinator.feeds.len(), 2);
        assert_eq!(coordinator.sink, SinkTarget::Stdout);
    }

    #[test]
    fn test_flags_and_values() {
        let cli = parse(&[
            "--feed-url", "ws://localhost:30152",
            "--include-tisb",
            "--tisb-only", "yes",
            "--uid-key", "reg",
            "--alt-upper", "10000",
            "--queue-policy", "drop",
            "--cot-host-id", "gw1",
        ]);
        assert!(cli.include_tisb);
        assert!(cli.tisb_only);
        assert_eq!(cli.uid_key, UidKey::Reg);
        assert_eq!(cli.queue_policy, QueuePolicy::Drop);

        let config = cli.cot_config().unwrap();
        assert_eq!(config.alt_upper, Some(10000.0));
        assert_eq!(config.cot_host_id, "gw1");
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(Cli::try_parse_from(["adsbcot"]).is_err());
        assert!(Cli::try_parse_from(["adsbcot", "--feed-url", "x", "--uid-key", "tail"]).is_err());

        let cli = parse(&["--feed-url", "tcp+avr://host"]);
        assert!(matches!(cli.build(), Err(GatewayError::InvalidDataType(_))));

        let cli = parse(&[
            "--feed-url", "file:///tmp/a.json",
            "--alt-lower", "5000",
            "--alt-upper", "1000",
        ]);
        assert!(cli.build().is_err());
    }

    #[test]
    fn test_known_craft_loaded() {
        let mut csv = tempfile::NamedTempFile::new().unwrap();
        writeln!(csv, "DOMAIN,AGENCY,REG,CALLSIGN,TYPE,MODEL,HEX,COT,ICON").unwrap();
        writeln!(csv, "FOOD,EL FAROLITO,N739UL,TACO_01,HELICOPTER,,A9EE47,a-f-A-T-A-C-O,").unwrap();

        let path = csv.path().display().to_string();
        let cli = parse(&["--feed-url", "file:///tmp/a.json", "--known-craft", &path]);
        let coordinator = cli.build().unwrap();
        assert_eq!(coordinator.state.registry().map(|r| r.len()), Some(1));
    }
}
