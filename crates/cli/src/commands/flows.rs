//! Flow list and watch commands

use anyhow::{Context, Result};
use colored::Colorize;
use tabled::Tabled;

use super::{parse_duration, FilterArgs};
use crate::client::{ApiClient, FlowResult, ListRequest, ListResponse, StreamRequest, TimeRange};
use crate::output::{
    color_action, format_bytes, format_endpoint, format_timestamp, print_info, print_warning,
    OutputFormat,
};

/// Row for flows table
#[derive(Tabled)]
struct FlowRow {
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Destination")]
    destination: String,
    #[tabled(rename = "Proto")]
    proto: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Packets In/Out")]
    packets: String,
    #[tabled(rename = "Bytes In/Out")]
    bytes: String,
    #[tabled(rename = "Conns Live")]
    live: String,
}

impl From<&FlowResult> for FlowRow {
    fn from(result: &FlowResult) -> Self {
        let flow = &result.flow;
        let key = &flow.key;
        Self {
            start: format_timestamp(flow.start_time),
            source: format_endpoint(&key.source_namespace, &key.source_name),
            destination: format!(
                "{}:{}",
                format_endpoint(&key.dest_namespace, &key.dest_name),
                key.dest_port
            ),
            proto: key.proto.clone(),
            action: color_action(&key.action),
            packets: format!("{}/{}", flow.packets_in, flow.packets_out),
            bytes: format!(
                "{}/{}",
                format_bytes(flow.bytes_in),
                format_bytes(flow.bytes_out)
            ),
            live: flow.num_connections_live.to_string(),
        }
    }
}

/// Options for `flows list`
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub filter: FilterArgs,
    pub since: String,
    pub interval: i64,
    pub sort: Vec<String>,
    pub page: i64,
    pub page_size: i64,
}

/// List rolled-up flows
pub async fn list_flows(client: &ApiClient, options: ListOptions, format: OutputFormat) -> Result<()> {
    let lookback = parse_duration(&options.since)?;
    let request = ListRequest {
        time_range: TimeRange {
            low: -lookback,
            high: 0,
        },
        filter: options.filter.to_filter(),
        aggregation_interval: options.interval,
        sort_by: options.sort,
        page: options.page,
        page_size: options.page_size,
    };

    let result: ListResponse = client.post("v1/flows", &request).await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&result)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            if result.flows.is_empty() {
                print_warning("No flows found");
                return Ok(());
            }

            let rows: Vec<FlowRow> = result.flows.iter().map(FlowRow::from).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!(
                "\nPage {} of {} ({} flows)",
                result.page, result.total_pages, result.total
            );
        }
    }

    Ok(())
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental parser for a `text/event-stream` body
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Feed a chunk and return every event it completed
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = value.to_string(),
            "data" => data.push(value),
            _ => {}
        }
    }

    // Keep-alive comments carry no data
    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// Follow the live flow stream until the server ends it or the user interrupts
pub async fn watch_flows(
    client: &ApiClient,
    filter: FilterArgs,
    since: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let start_time_gte = match since {
        Some(since) => -parse_duration(&since)?,
        None => 0,
    };
    let request = StreamRequest {
        start_time_gte,
        filter: filter.to_filter(),
    };

    let mut response = client.post_stream("v1/flows/stream", &request).await?;
    if format == OutputFormat::Table {
        print_info("Watching flows, press Ctrl-C to stop");
    }

    let mut parser = SseParser::default();
    while let Some(chunk) = response.chunk().await.context("Stream interrupted")? {
        let text = String::from_utf8_lossy(&chunk);
        for event in parser.push(&text) {
            match event.event.as_str() {
                "flow" => {
                    let result: FlowResult =
                        serde_json::from_str(&event.data).context("Invalid flow event")?;
                    print_flow(&result, format)?;
                }
                "end" => {
                    if format == OutputFormat::Table {
                        print_warning(&format!("Stream ended by server ({})", event.data));
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn print_flow(result: &FlowResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(result)?),
        OutputFormat::Table => {
            let row = FlowRow::from(result);
            println!(
                "{}  {} -> {}  {}  {}  pkts {}  bytes {}",
                row.start.dimmed(),
                row.source.cyan(),
                row.destination.cyan(),
                row.proto,
                row.action,
                row.packets,
                row.bytes
            );
        }
    }
    Ok(())
}
