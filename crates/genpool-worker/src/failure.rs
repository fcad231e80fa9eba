//! Classification of upstream HTTP failures.

/// What a failed response means for the worker that received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Session permanently invalid: clear cookies and evict.
    AuthExpired,
    /// Balance exhausted: suspend the account and evict.
    QuotaExhausted,
    /// Anything else: surfaced to the caller, worker survives.
    Upstream,
}

impl FailureClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::AuthExpired,
            402 => Self::QuotaExhausted,
            _ => Self::Upstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(FailureClass::from_status(401), FailureClass::AuthExpired);
        assert_eq!(FailureClass::from_status(402), FailureClass::QuotaExhausted);
        for status in [400, 403, 404, 429, 500, 502] {
            assert_eq!(FailureClass::from_status(status), FailureClass::Upstream);
        }
    }
}
