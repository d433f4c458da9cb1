use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use dashfrog_lib::timewindow::{RelativeWindow, TimeWindowConfig};

use crate::OutputFormat;

pub fn run(
    preset: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let config = match (preset, start, end) {
        (Some(preset), _, _) => TimeWindowConfig::relative(preset.parse::<RelativeWindow>()?),
        (None, Some(start), Some(end)) => {
            TimeWindowConfig::absolute(parse_time(start)?, parse_time(end)?)?
        }
        _ => TimeWindowConfig::default(),
    };
    let resolved = config.resolve();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "config": config,
                "resolved": resolved,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            let label = match &config {
                TimeWindowConfig::Relative { value } => format!("last {}", value.as_str()),
                TimeWindowConfig::Absolute { .. } => "absolute".to_string(),
            };
            println!("{}: {} .. {}", label, resolved.start.to_rfc3339(), resolved.end.to_rfc3339());
            println!("span: {} min", resolved.span().num_minutes());
        }
    }
    Ok(())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("'{}' is not an RFC 3339 timestamp", raw))?;
    Ok(parsed.with_timezone(&Utc))
}
