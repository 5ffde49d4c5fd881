use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dns_conn::Protocol;
use dns_rr::{RRClass, RRType};
use dns_scanner::{DNSScanner, QueryId, ScanConfig};

mod dns_conn;
mod dns_hdr;
mod dns_rr;
mod dns_scanner;
mod error;

#[derive(Parser)]
#[command(name = "dnsscan")]
#[command(version)]
#[command(about = "Query one resolver for many names concurrently")]
struct Cli {
    /// DNS server
    #[arg(long, default_value = "8.8.8.8:53")]
    ns: String,

    /// Transport layer protocol
    #[arg(long, value_enum, default_value_t = Protocol::Udp)]
    proto: Protocol,

    /// Dial and connection timeout (e.g. 500ms, 10s, 1m)
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    timeout: Duration,

    /// Record class
    #[arg(long, default_value = "IN")]
    class: String,

    /// Record type
    #[arg(long = "type", default_value = "ANY")]
    rtype: String,

    /// Transaction ID for every query
    #[arg(long, default_value = "0xabcd", value_parser = parse_id)]
    id: u16,

    /// Use a random transaction ID per query instead of --id
    #[arg(long)]
    random_id: bool,

    /// Reject replies claiming more than this many questions
    #[arg(long)]
    max_questions: Option<u16>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Names to query
    names: Vec<String>,
}

fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let n: u64 = num
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => n
            .checked_mul(60)
            .map(Duration::from_secs)
            .with_context(|| format!("invalid duration: {s}")),
        _ => anyhow::bail!("invalid duration unit: {unit}"),
    }
}

fn parse_id(s: &str) -> Result<u16> {
    let id = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    id.with_context(|| format!("invalid transaction id: {s}"))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    anyhow::ensure!(!cli.names.is_empty(), "no names given");

    let qclass: RRClass = cli.class.parse().context("invalid --class")?;
    let qtype: RRType = cli.rtype.parse().context("invalid --type")?;

    let config = ScanConfig {
        resolver: cli.ns,
        protocol: cli.proto,
        timeout: cli.timeout,
        qtype,
        qclass,
        query_id: if cli.random_id {
            QueryId::Random
        } else {
            QueryId::Fixed(cli.id)
        },
        max_questions: cli.max_questions,
    };

    info!(
        resolver = %config.resolver,
        proto = %config.protocol,
        qtype = %qtype,
        qclass = %qclass,
        names = cli.names.len(),
        "scanning"
    );

    let outcomes = DNSScanner::new(config).scan(&cli.names);
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.result.is_err())
        .map(|o| o.name.as_str())
        .collect();
    info!(ok = outcomes.len() - failed.len(), failed = failed.len(), "scan complete");
    if !failed.is_empty() {
        warn!(names = ?failed, "failed lookups");
    }

    Ok(())
}
