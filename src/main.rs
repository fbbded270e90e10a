use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde_json::{Value as JsonValue, json};

use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use common::model::{TimeRange, millis_from_secs};
use promclient::{PromApi, build_client};
use querier::cache::{CacheError, MemoryCache};
use querier::query::promql::{SelectorOffset, parser, rewrite};

/// Resolution limit of a range query, as enforced by Prometheus
const MAX_POINTS: u64 = 11_000;

#[derive(Parser)]
#[command(name = "promfed")]
#[command(about = "promfed - query several Prometheus server groups as one")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: PromfedCommands,
}

#[derive(Subcommand)]
enum PromfedCommands {
    /// List label names known to each backend
    Labels,
    /// List the values of one label
    LabelValues { name: String },
    /// Evaluate an instant query
    Query {
        query: String,
        #[arg(long, help = "Evaluation time (RFC 3339 or unix seconds), default now")]
        time: Option<String>,
    },
    /// Evaluate a range query
    QueryRange {
        query: String,
        #[arg(long, help = "Range start, default one hour before end")]
        start: Option<String>,
        #[arg(long, help = "Range end, default now")]
        end: Option<String>,
        #[arg(long, default_value_t = 60.0, help = "Step in seconds")]
        step: f64,
    },
    /// Find series matching one or more selectors
    Series {
        #[arg(required = true)]
        matches: Vec<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Read raw samples of a selector
    Raw {
        selector: String,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

/// One backend host of one server group
struct Backend {
    group: usize,
    target: String,
    api: Arc<dyn PromApi>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    if let PromfedCommands::Common(common_cmd) = &cli.command {
        return utils::handle_common_command(common_cmd, &config);
    }

    config.validate().context("Invalid configuration")?;
    let backends = build_backends(&config)?;
    if backends.is_empty() {
        tracing::warn!("No backends configured, nothing to query");
    }

    let cache = MemoryCache::connect(config.cache.clone()).context("Failed to start result cache")?;
    let ttl = config.cache.default_ttl;

    let results = match cli.command {
        PromfedCommands::Labels => fan_out(&backends, |b| async move { b.api.label_names().await }).await,
        PromfedCommands::LabelValues { name } => {
            let name = name.as_str();
            fan_out(&backends, |b| async move { b.api.label_values(name).await }).await
        }
        PromfedCommands::Query { query, time } => {
            let ts = time.as_deref().map(parse_time).transpose()?.unwrap_or_else(Utc::now);
            let (query, offset) = normalize(&query)?;
            let ts = ts - shift_of(offset);
            let query = query.as_str();
            let cache = &cache;

            fan_out(&backends, |b| async move {
                let key = format!("{}|query|{query}|{}", b.target, ts.timestamp_millis());
                let mut value = cache.get_or_fetch(&key, ttl, || b.api.query(query, ts)).await?;
                rewrite::restore_instant_offset(&mut value, offset);
                Ok::<_, CacheError>(value)
            })
            .await
        }
        PromfedCommands::QueryRange {
            query,
            start,
            end,
            step,
        } => {
            let (start, end) = window(start.as_deref(), end.as_deref())?;
            let (query, offset) = normalize(&query)?;
            let step = Duration::try_from_secs_f64(step).context("Invalid step")?;
            let range = TimeRange::new(start - shift_of(offset), end - shift_of(offset), step)?;
            if range.steps() > MAX_POINTS {
                anyhow::bail!(
                    "Range of {} steps exceeds the maximum of {MAX_POINTS} points per series, raise --step",
                    range.steps()
                );
            }
            let query = query.as_str();
            let cache = &cache;

            fan_out(&backends, |b| async move {
                let key = format!(
                    "{}|query_range|{query}|{}|{}|{}",
                    b.target,
                    range.start.timestamp_millis(),
                    range.end.timestamp_millis(),
                    range.step.as_millis()
                );
                let mut value = cache
                    .get_or_fetch(&key, ttl, || b.api.query_range(query, range))
                    .await?;
                rewrite::restore_range_offset(&mut value, offset);
                Ok::<_, CacheError>(value)
            })
            .await
        }
        PromfedCommands::Series {
            matches,
            start,
            end,
        } => {
            for selector in &matches {
                parser::validate(selector).with_context(|| format!("Invalid selector {selector:?}"))?;
            }
            let (start, end) = window(start.as_deref(), end.as_deref())?;
            let matches = matches.as_slice();
            fan_out(&backends, |b| async move { b.api.series(matches, start, end).await }).await
        }
        PromfedCommands::Raw {
            selector,
            start,
            end,
        } => {
            let matchers = parser::selector_matchers(&selector)
                .with_context(|| format!("Invalid selector {selector:?}"))?;
            let (start, end) = window(start.as_deref(), end.as_deref())?;
            let matchers = matchers.as_slice();
            let selector = selector.as_str();
            let cache = &cache;

            fan_out(&backends, |b| async move {
                let key = format!(
                    "{}|raw|{selector}|{}|{}",
                    b.target,
                    start.timestamp_millis(),
                    end.timestamp_millis()
                );
                cache
                    .get_or_fetch(&key, ttl, || b.api.get_value(start, end, matchers))
                    .await
            })
            .await
        }
        PromfedCommands::Common(_) => return Ok(()),
    };

    let output =
        serde_json::to_string_pretty(&JsonValue::Array(results)).context("Failed to serialize results")?;
    println!("{output}");
    Ok(())
}

fn build_backends(config: &Configuration) -> Result<Vec<Backend>> {
    let mut backends = Vec::new();
    for (group, group_config) in config.server_groups.iter().enumerate() {
        let targets = group_config
            .targets()
            .with_context(|| format!("Failed to resolve targets of server group {group}"))?;
        for target in targets {
            let api = build_client(group_config, &target)
                .with_context(|| format!("Failed to build client for {}", target.url))?;
            backends.push(Backend {
                group,
                target: target.url.to_string(),
                api,
            });
        }
    }
    tracing::info!(backends = backends.len(), "Built backend clients");
    Ok(backends)
}

/// Run `op` against every backend concurrently, one JSON record per backend
async fn fan_out<'a, T, E, F, Fut>(backends: &'a [Backend], op: F) -> Vec<JsonValue>
where
    F: Fn(&'a Backend) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    T: serde::Serialize,
    E: std::fmt::Display,
{
    join_all(backends.iter().map(|backend| {
        let fut = op(backend);
        async move {
            let mut record = json!({
                "server_group": backend.group,
                "target": backend.target,
                "labels": backend.api.key(),
            });
            match fut.await {
                Ok(data) => record["data"] = json!(data),
                Err(e) => {
                    tracing::warn!(backend = %backend.target, error = %e, "Backend request failed");
                    record["error"] = json!(e.to_string());
                }
            }
            record
        }
    }))
    .await
}

/// Split the shared selector offset off a query
fn normalize(query: &str) -> Result<(String, SelectorOffset)> {
    let expr = parser::parse(query).context("Invalid query")?;
    let (expr, offset) = rewrite::strip_offset(&expr).context("Query cannot be federated")?;
    Ok((expr.to_string(), offset))
}

/// How far evaluation moves back so an offset-free query sees the same data
fn shift_of(offset: SelectorOffset) -> chrono::Duration {
    chrono::Duration::milliseconds(offset.as_millis())
}

/// Accepts RFC 3339 or (fractional) unix seconds
fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(secs) = value.parse::<f64>() {
        return Utc
            .timestamp_millis_opt(millis_from_secs(secs))
            .single()
            .with_context(|| format!("Timestamp out of range: {value}"));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("Invalid time {value:?}"))
}

fn window(start: Option<&str>, end: Option<&str>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = end.map(parse_time).transpose()?.unwrap_or_else(Utc::now);
    let start = match start {
        Some(start) => parse_time(start)?,
        None => end - chrono::Duration::hours(1),
    };
    if end < start {
        anyhow::bail!("End {end} is before start {start}");
    }
    Ok((start, end))
}
