//! User-facing alert seam for unexpected fetch failures.

use tracing::error;

/// Surface a failure to the user.
#[cfg_attr(test, mockall::automock)]
pub trait Alerter: Send + Sync {
    fn alert(&self, title: &str, message: &str);
}

/// Default sink: logs the alert at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

impl Alerter for LogAlerter {
    fn alert(&self, title: &str, message: &str) {
        error!(title = %title, "{}", message);
    }
}

/// Whether `message` matches one of the expected "not signed in" signatures.
/// Matching is case-insensitive.
pub fn is_auth_error(message: &str, signatures: &[String]) -> bool {
    let lowered = message.to_lowercase();
    signatures
        .iter()
        .any(|sig| !sig.is_empty() && lowered.contains(&sig.to_lowercase()))
}
