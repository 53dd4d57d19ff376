//! Command implementations

pub mod flows;
pub mod hints;
pub mod status;

use crate::client::{Filter, StringMatch};
use anyhow::{Context, Result};
use clap::Args;

/// Flow filter options shared by the query commands
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Source workload name (repeatable)
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Source namespace (repeatable)
    #[arg(long = "source-namespace")]
    pub source_namespaces: Vec<String>,

    /// Destination workload name (repeatable)
    #[arg(long = "dest")]
    pub dests: Vec<String>,

    /// Destination namespace (repeatable)
    #[arg(long = "dest-namespace")]
    pub dest_namespaces: Vec<String>,

    /// Match names and namespaces as substrings
    #[arg(long)]
    pub fuzzy: bool,

    /// Protocol, e.g. tcp or udp (repeatable)
    #[arg(long = "protocol")]
    pub protocols: Vec<String>,

    /// Verdict: allow, deny or pass (repeatable)
    #[arg(long = "action")]
    pub actions: Vec<String>,

    /// Reporting side: src or dst
    #[arg(long)]
    pub reporter: Option<String>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> Filter {
        let match_type = if self.fuzzy { "fuzzy" } else { "exact" };
        let matches = |values: &[String]| -> Vec<StringMatch> {
            values
                .iter()
                .map(|value| StringMatch {
                    value: value.clone(),
                    match_type: match_type.to_string(),
                })
                .collect()
        };

        Filter {
            source_names: matches(&self.sources),
            source_namespaces: matches(&self.source_namespaces),
            dest_names: matches(&self.dests),
            dest_namespaces: matches(&self.dest_namespaces),
            protocols: self.protocols.clone(),
            actions: self.actions.iter().map(|a| a.to_lowercase()).collect(),
            reporter: self.reporter.as_ref().map(|r| r.to_lowercase()),
        }
    }
}

/// Parse a lookback such as `90s`, `15m`, `1h` or `2d` into seconds
pub fn parse_duration(value: &str) -> Result<i64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: i64 = digits
        .parse()
        .with_context(|| format!("Invalid duration '{}'", value))?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        other => anyhow::bail!("Unknown duration unit '{}' in '{}'", other, value),
    };
    Ok(amount * multiplier)
}
