//! Filter hint command

use anyhow::Result;
use clap::ValueEnum;

use super::{parse_duration, FilterArgs};
use crate::client::{ApiClient, HintsRequest, HintsResponse, TimeRange};
use crate::output::{print_warning, OutputFormat};

/// Field to list observed values for
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HintField {
    DestName,
    SourceName,
    DestNamespace,
    SourceNamespace,
    PolicyTier,
}

impl HintField {
    fn as_str(&self) -> &'static str {
        match self {
            HintField::DestName => "dest_name",
            HintField::SourceName => "source_name",
            HintField::DestNamespace => "dest_namespace",
            HintField::SourceNamespace => "source_namespace",
            HintField::PolicyTier => "policy_tier",
        }
    }
}

/// Show distinct values of a field among observed flows
pub async fn show_hints(
    client: &ApiClient,
    field: HintField,
    filter: FilterArgs,
    since: &str,
    limit: i64,
    format: OutputFormat,
) -> Result<()> {
    let lookback = parse_duration(since)?;
    let request = HintsRequest {
        field: field.as_str().to_string(),
        filter: filter.to_filter(),
        time_range: TimeRange {
            low: -lookback,
            high: 0,
        },
        page: 1,
        page_size: limit,
    };

    let result: HintsResponse = client.post("v1/filter-hints", &request).await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&result)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            if result.hints.is_empty() {
                print_warning("No values observed");
                return Ok(());
            }
            for hint in &result.hints {
                println!("{}", hint);
            }
            if result.hints.len() < result.total {
                println!("\nShowing {} of {} values", result.hints.len(), result.total);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_match_api() {
        assert_eq!(HintField::DestNamespace.as_str(), "dest_namespace");
        assert_eq!(HintField::PolicyTier.as_str(), "policy_tier");
    }
}
