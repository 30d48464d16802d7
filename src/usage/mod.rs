//! Database usage governance: daily read/write counters with a soft quota.

pub mod monitor;
pub mod tracking;

pub use monitor::{Access, UsageLevel, UsageMonitor, UsageReport, UsageStats};
pub use tracking::with_usage_tracking;
