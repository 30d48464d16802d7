//! Cache statistics, key listing and invalidation command handlers.

use anyhow::{Context, Result};
use regex::Regex;

use readgate::Gate;

/// Handle `readgate stats`.
pub(crate) fn cmd_stats(gate: &Gate, json: bool) -> Result<String> {
    let stats = gate.cache().stats();
    if json {
        return Ok(serde_json::to_string_pretty(&stats)?);
    }

    let mut out = String::new();
    out.push_str(&format!("{:<16} {}\n", "Entries", stats.size));
    out.push_str(&format!("{:<16} {}\n", "Requests", stats.request_count));
    out.push_str(&format!(
        "{:<16} {} ({:.1}%)\n",
        "Hits", stats.hit_count, stats.hit_rate
    ));
    out.push_str(&format!(
        "{:<16} {} ({:.1}%)",
        "Misses", stats.miss_count, stats.miss_rate
    ));
    Ok(out)
}

/// Handle `readgate keys`.
pub(crate) fn cmd_keys(gate: &Gate, json: bool) -> Result<String> {
    let keys = gate.cache().keys();
    if json {
        return Ok(serde_json::to_string_pretty(&keys)?);
    }
    if keys.is_empty() {
        return Ok("Cache is empty.".to_string());
    }
    Ok(keys.join("\n"))
}

/// Handle `readgate clear [--pattern REGEX]`.
pub(crate) fn cmd_clear(gate: &Gate, pattern: Option<&str>) -> Result<String> {
    match pattern {
        Some(raw) => {
            let re = Regex::new(raw).with_context(|| format!("Invalid pattern '{}'", raw))?;
            let removed = gate.cache().clear_pattern(&re);
            Ok(format!("Removed {} cache entries matching '{}'.", removed, raw))
        }
        None => {
            let count = gate.cache().len();
            gate.cache().clear();
            Ok(format!("Cleared {} cache entries.", count))
        }
    }
}
