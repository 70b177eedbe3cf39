//! Recovery diagnostics for JSON extraction.
//!
//! [`RecoveryDiagnostics`] records what happened while recovering JSON from a
//! model response: which cascade step produced the value, which cleaning
//! transforms applied, and whether the brace-scan fallback was ambiguous.

/// Records what happened during JSON recovery.
///
/// # Example
///
/// ```
/// use content_pipeline::diagnostics::RecoveryDiagnostics;
///
/// let diag = RecoveryDiagnostics::default();
/// assert!(!diag.ok());
/// assert!(!diag.ambiguous());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryDiagnostics {
    /// Which step produced the value: `"span"`, `"cleaned"` or `"brace_scan"`.
    /// `None` means recovery failed.
    pub strategy: Option<&'static str>,

    /// Whether a code fence was stripped.
    pub fence_stripped: bool,

    /// Whether a short prose prefix was stripped.
    pub prose_stripped: bool,

    /// Number of top-level balanced objects found by the brace scan.
    /// 0 when the scan did not run.
    pub candidates_found: usize,

    /// Number of those candidates that parse as JSON.
    pub candidates_parsed: usize,
}

impl RecoveryDiagnostics {
    /// Did recovery produce a value?
    pub fn ok(&self) -> bool {
        self.strategy.is_some()
    }

    /// More than one brace-scan candidate parsed, so the chosen one was picked
    /// by ordering alone.
    pub fn ambiguous(&self) -> bool {
        self.candidates_parsed > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_default() {
        let d = RecoveryDiagnostics::default();
        assert!(!d.ok());
        assert_eq!(d.candidates_found, 0);
        assert!(!d.fence_stripped);
    }

    #[test]
    fn test_diagnostics_ambiguous() {
        let d = RecoveryDiagnostics {
            strategy: Some("brace_scan"),
            candidates_found: 3,
            candidates_parsed: 2,
            ..Default::default()
        };
        assert!(d.ok());
        assert!(d.ambiguous());
    }
}
