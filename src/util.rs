//! Small shared helpers used across handlers.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::error::{msg, AppError, Result};

/// Spawn a fire-and-forget task whose panics are logged, never propagated.
///
/// Everything detached in this service (webhook processing, fulfillment,
/// email) goes through here so a panicking payload can only ever cost its
/// own task.
pub fn spawn_detached<F>(task: &'static str, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(AssertUnwindSafe(future).catch_unwind().map(move |result| {
        if let Err(panic) = result {
            let panic_msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(task, panic = %panic_msg, "Detached task panicked");
        }
    }));
}

/// Validate basic email shape without pulling in a full parser.
///
/// Checks: exactly one `@`, non-empty local part without spaces, and a
/// domain that contains a dot and does not start or end with one.
pub fn validate_email_format(email: &str) -> Result<()> {
    let email = email.trim();
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }
    let (local, domain) = (parts[0], parts[1]);
    if local.is_empty() || local.contains(' ') {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }
    Ok(())
}

/// Mask a payer email for public order lookups: `jo***@example.com`.
///
/// The first two characters of the local part stay visible so buyers can
/// recognize their own address without the full email leaking.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let visible: String = local.chars().take(2).collect();
            format!("{}***@{}", visible, domain)
        }
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_normal_emails() {
        assert!(validate_email_format("jo@example.com").is_ok());
        assert!(validate_email_format("  padded@example.co.uk  ").is_ok());
    }

    #[test]
    fn rejects_malformed_emails() {
        assert!(validate_email_format("no-at-sign").is_err());
        assert!(validate_email_format("two@@example.com").is_err());
        assert!(validate_email_format("@example.com").is_err());
        assert!(validate_email_format("a b@example.com").is_err());
        assert!(validate_email_format("a@nodot").is_err());
        assert!(validate_email_format("a@.example.com").is_err());
        assert!(validate_email_format("a@example.com.").is_err());
    }

    #[test]
    fn masks_local_part() {
        assert_eq!(mask_email("joao@example.com"), "jo***@example.com");
        assert_eq!(mask_email("a@example.com"), "a***@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }
}
