//! Usage report and reset command handlers.

use anyhow::Result;
use chrono::{Local, TimeZone};

use readgate::Gate;

/// Handle `readgate usage`.
pub(crate) fn cmd_usage(gate: &Gate, json: bool) -> Result<String> {
    let report = gate.usage().usage_stats();
    if json {
        return Ok(serde_json::to_string_pretty(&report)?);
    }

    let since = Local
        .timestamp_millis_opt(report.last_reset)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| report.last_reset.to_string());

    let mut out = format!(
        "{:<12} {:<12} {:<14} {:<10}\n",
        "Reads", "Writes", "Daily Limit", "Used"
    );
    out.push_str(&format!("{}\n", "-".repeat(50)));
    out.push_str(&format!(
        "{:<12} {:<12} {:<14} {:<10}\n",
        report.reads,
        report.writes,
        report.daily_read_limit,
        format!("{:.1}%", report.read_percentage),
    ));
    out.push_str(&format!("Counting since {}", since));
    Ok(out)
}

/// Handle `readgate reset`.
pub(crate) fn cmd_reset(gate: &Gate) -> String {
    let cleared = gate.cache().len();
    gate.usage().reset_counters();
    format!("Reset usage counters and cleared {} cache entries.", cleared)
}
