//! Error classification: probe outcome → `(category, detail)`.
//!
//! ```text
//! classify(outcome)
//!   ├── Ok                          → (ok, "ok")
//!   ├── Classified anywhere in chain → verbatim
//!   ├── sentinels                    → timeout / connection_refused / unhealthy
//!   ├── typed causes                 → deadline, dns, refused, dial timeout, tls
//!   ├── message heuristic            → tls / x509 / certificate
//!   └── fallback                     → (error, "error")
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::probe::{ProbeError, ProbeOutcome};

/// Closed taxonomy of check outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Ok,
    Timeout,
    ConnectionError,
    DnsError,
    AuthError,
    TlsError,
    Unhealthy,
    Error,
    /// No probe has completed yet. Never produced by [`classify`].
    Unknown,
}

impl StatusCategory {
    /// Every category a check can produce. `Unknown` is reporting-only.
    pub const ALL: [StatusCategory; 8] = [
        StatusCategory::Ok,
        StatusCategory::Timeout,
        StatusCategory::ConnectionError,
        StatusCategory::DnsError,
        StatusCategory::AuthError,
        StatusCategory::TlsError,
        StatusCategory::Unhealthy,
        StatusCategory::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCategory::Ok => "ok",
            StatusCategory::Timeout => "timeout",
            StatusCategory::ConnectionError => "connection_error",
            StatusCategory::DnsError => "dns_error",
            StatusCategory::AuthError => "auth_error",
            StatusCategory::TlsError => "tls_error",
            StatusCategory::Unhealthy => "unhealthy",
            StatusCategory::Error => "error",
            StatusCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified check outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub category: StatusCategory,
    /// Fine-grained reason, e.g. `http_503` or `connection_refused`.
    pub detail: String,
}

impl CheckResult {
    pub fn new(category: StatusCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            detail: detail.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCategory::Ok, "ok")
    }

    pub fn unknown() -> Self {
        Self::new(StatusCategory::Unknown, "unknown")
    }

    pub fn is_ok(&self) -> bool {
        self.category == StatusCategory::Ok
    }

    fn timeout() -> Self {
        Self::new(StatusCategory::Timeout, "timeout")
    }

    fn refused() -> Self {
        Self::new(StatusCategory::ConnectionError, "connection_refused")
    }

    fn tls() -> Self {
        Self::new(StatusCategory::TlsError, "tls_error")
    }
}

/// Classify a probe outcome. Total and pure.
pub fn classify(outcome: &ProbeOutcome) -> CheckResult {
    match outcome {
        Ok(()) => CheckResult::ok(),
        Err(err) => classify_error(err),
    }
}

/// Classify a probe failure.
pub fn classify_error(err: &ProbeError) -> CheckResult {
    let chain = causes(err);
    let probe_errors = || chain.iter().filter_map(|c| c.downcast_ref::<ProbeError>());

    // Explicit classification wins over whatever caused it.
    if let Some(ProbeError::Classified {
        category, detail, ..
    }) = probe_errors().find(|e| matches!(e, ProbeError::Classified { .. }))
    {
        return CheckResult::new(*category, detail.clone());
    }

    for e in probe_errors() {
        match e {
            ProbeError::Timeout => return CheckResult::timeout(),
            ProbeError::ConnectionRefused => return CheckResult::refused(),
            ProbeError::Unhealthy(_) => {
                return CheckResult::new(StatusCategory::Unhealthy, "unhealthy");
            }
            _ => {}
        }
    }

    if any_cause(&chain, is_deadline) {
        return CheckResult::timeout();
    }
    if any_cause(&chain, |c| {
        matches!(c.downcast_ref::<ProbeError>(), Some(ProbeError::Dns { .. }))
    }) {
        return CheckResult::new(StatusCategory::DnsError, "dns_error");
    }
    if any_cause(&chain, |c| io_kind(c) == Some(io::ErrorKind::ConnectionRefused)) {
        return CheckResult::refused();
    }
    if any_cause(&chain, |c| io_kind(c) == Some(io::ErrorKind::TimedOut)) {
        return CheckResult::timeout();
    }
    if any_cause(&chain, |c| {
        matches!(c.downcast_ref::<ProbeError>(), Some(ProbeError::Tls(_)))
    }) {
        return CheckResult::tls();
    }
    if any_cause(&chain, |c| looks_like_tls(&c.to_string())) {
        return CheckResult::tls();
    }

    CheckResult::new(StatusCategory::Error, "error")
}

/// Flatten a failure into its cause chain, outermost first.
///
/// Transparent variants forward `source()` past their payload, so the
/// payload is pushed explicitly.
fn causes(err: &ProbeError) -> Vec<&(dyn StdError + 'static)> {
    let next: Option<&(dyn StdError + 'static)> = match err {
        ProbeError::Other(inner) => return inner.chain().collect(),
        ProbeError::Io(inner) => Some(inner as &(dyn StdError + 'static)),
        other => other.source(),
    };
    let mut chain = vec![err as &(dyn StdError + 'static)];
    chain.extend(std::iter::successors(next, |&e| e.source()));
    chain
}

fn any_cause(
    chain: &[&(dyn StdError + 'static)],
    pred: impl Fn(&(dyn StdError + 'static)) -> bool,
) -> bool {
    chain.iter().any(|c| pred(*c))
}

fn is_deadline(cause: &(dyn StdError + 'static)) -> bool {
    cause.is::<tokio::time::error::Elapsed>()
        || matches!(
            cause.downcast_ref::<ProbeError>(),
            Some(ProbeError::DeadlineExceeded(_))
        )
}

fn io_kind(cause: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    if let Some(e) = cause.downcast_ref::<io::Error>() {
        return Some(e.kind());
    }
    match cause.downcast_ref::<ProbeError>() {
        Some(ProbeError::Io(e)) => Some(e.kind()),
        _ => None,
    }
}

fn looks_like_tls(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("tls") || lower.contains("x509") || lower.contains("certificate")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Context;

    use super::*;

    fn category_of(err: ProbeError) -> (StatusCategory, String) {
        let r = classify(&Err(err));
        (r.category, r.detail)
    }

    #[test]
    fn success_is_ok() {
        assert_eq!(classify(&Ok(())), CheckResult::ok());
    }

    #[test]
    fn explicit_classification_wins() {
        let err = ProbeError::classified(StatusCategory::Unhealthy, "http_503", "HTTP 503");
        assert_eq!(
            category_of(err),
            (StatusCategory::Unhealthy, "http_503".to_string())
        );
    }

    #[test]
    fn explicit_classification_wins_over_wrapped_cause() {
        // A tagged error buried under context that would otherwise look like TLS.
        let inner = ProbeError::classified(StatusCategory::AuthError, "auth_error", "tls auth");
        let err = ProbeError::Other(anyhow::Error::new(inner).context("certificate handshake"));
        assert_eq!(
            category_of(err),
            (StatusCategory::AuthError, "auth_error".to_string())
        );
    }

    #[test]
    fn sentinels() {
        assert_eq!(
            category_of(ProbeError::Timeout),
            (StatusCategory::Timeout, "timeout".to_string())
        );
        assert_eq!(
            category_of(ProbeError::ConnectionRefused),
            (StatusCategory::ConnectionError, "connection_refused".to_string())
        );
        assert_eq!(
            category_of(ProbeError::Unhealthy("replica lag".into())),
            (StatusCategory::Unhealthy, "unhealthy".to_string())
        );
    }

    #[test]
    fn deadline_exceeded_is_timeout() {
        let err = ProbeError::DeadlineExceeded(Duration::from_secs(5));
        assert_eq!(category_of(err).0, StatusCategory::Timeout);
    }

    #[tokio::test]
    async fn tokio_elapsed_is_timeout() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let err = ProbeError::Other(anyhow::Error::new(elapsed).context("probe"));
        assert_eq!(
            category_of(err),
            (StatusCategory::Timeout, "timeout".to_string())
        );
    }

    #[test]
    fn dns_failure() {
        let err = ProbeError::Dns {
            host: "nope.invalid".into(),
            message: "failed to lookup address information".into(),
        };
        assert_eq!(
            category_of(err),
            (StatusCategory::DnsError, "dns_error".to_string())
        );
    }

    #[test]
    fn io_refused_and_timed_out() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(
            category_of(ProbeError::Io(refused)),
            (StatusCategory::ConnectionError, "connection_refused".to_string())
        );

        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(category_of(ProbeError::Io(timed_out)).0, StatusCategory::Timeout);
    }

    #[test]
    fn io_error_inside_anyhow_chain() {
        let result: anyhow::Result<()> =
            Err(io::Error::from(io::ErrorKind::ConnectionRefused)).context("dialing pg.svc:5432");
        let err = ProbeError::Other(result.unwrap_err());
        assert_eq!(category_of(err).0, StatusCategory::ConnectionError);
    }

    #[test]
    fn typed_and_heuristic_tls() {
        assert_eq!(
            category_of(ProbeError::Tls("handshake failed".into())),
            (StatusCategory::TlsError, "tls_error".to_string())
        );

        let msg = io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid peer certificate: UnknownIssuer",
        );
        assert_eq!(category_of(ProbeError::Io(msg)).0, StatusCategory::TlsError);

        let x509 = ProbeError::Other(anyhow::anyhow!("x509: certificate signed by unknown authority"));
        assert_eq!(category_of(x509).0, StatusCategory::TlsError);
    }

    #[test]
    fn unrecognized_falls_back_to_error() {
        let err = ProbeError::Other(anyhow::anyhow!("something broke"));
        assert_eq!(category_of(err), (StatusCategory::Error, "error".to_string()));
        assert_eq!(
            category_of(ProbeError::Panicked("boom".into())),
            (StatusCategory::Error, "error".to_string())
        );
    }

    #[test]
    fn category_strings_match_serde() {
        for category in StatusCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
        assert_eq!(
            serde_json::to_string(&StatusCategory::Unknown).unwrap(),
            "\"unknown\""
        );
    }
}
