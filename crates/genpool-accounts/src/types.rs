//! Credential record types.

use serde::{Deserialize, Serialize};

/// A browser cookie as harvested from an authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
    /// Unix seconds; `None` for session-scoped cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
}

fn default_path() -> String {
    "/".into()
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            secure: true,
            http_only: false,
            expires: None,
        }
    }
}

/// Persisted state of one service account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
    /// Cookies harvested from the service and its auth subsystem.
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    /// Session-slot cookies re-signed on every request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_cookies: Vec<SessionCookie>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "ua")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub last_use_time: i64,
    #[serde(default)]
    pub use_count: u64,
    /// Soft suspension: not eligible for scheduling before this unix time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_until: Option<i64>,
    #[serde(default)]
    pub destroyed: bool,
}

impl AccountRecord {
    pub fn new(id: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            password: password.into(),
            recovery: None,
            cookies: Vec::new(),
            session_cookies: Vec::new(),
            token: None,
            user_id: None,
            proxy: None,
            user_agent: None,
            last_use_time: 0,
            use_count: 0,
            suspended_until: None,
            destroyed: false,
        }
    }

    pub fn with_recovery(mut self, recovery: impl Into<String>) -> Self {
        self.recovery = Some(recovery.into());
        self
    }

    pub fn find_cookie(&self, name: &str) -> Option<&SessionCookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.find_cookie(name).is_some()
    }

    pub fn is_suspended(&self, now: i64) -> bool {
        self.suspended_until.is_some_and(|until| until > now)
    }

    /// Whether a pool may hand this account to a new worker.
    pub fn is_eligible(&self, now: i64) -> bool {
        !self.email.is_empty() && !self.is_suspended(now)
    }

    /// Merge a partial update into this record.
    pub fn apply(&mut self, patch: AccountPatch) {
        if let Some(cookies) = patch.cookies {
            self.cookies = cookies;
        }
        if let Some(session_cookies) = patch.session_cookies {
            self.session_cookies = session_cookies;
        }
        if let Some(token) = patch.token {
            self.token = token;
        }
        if let Some(user_id) = patch.user_id {
            self.user_id = user_id;
        }
        if let Some(proxy) = patch.proxy {
            self.proxy = proxy;
        }
        if let Some(user_agent) = patch.user_agent {
            self.user_agent = Some(user_agent);
        }
        if let Some(at) = patch.record_use {
            self.last_use_time = at;
            self.use_count += 1;
        }
        if let Some(until) = patch.suspended_until {
            self.suspended_until = until;
        }
        if let Some(destroyed) = patch.destroyed {
            self.destroyed = destroyed;
        }
    }
}

/// Partial update of an [`AccountRecord`].
///
/// `None` leaves a field untouched. Nested options distinguish "clear" (`Some(None)`)
/// from "leave as is".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountPatch {
    pub cookies: Option<Vec<SessionCookie>>,
    pub session_cookies: Option<Vec<SessionCookie>>,
    pub token: Option<Option<String>>,
    pub user_id: Option<Option<String>>,
    pub proxy: Option<Option<String>>,
    pub user_agent: Option<String>,
    /// Count one unit of work at the given unix time.
    pub record_use: Option<i64>,
    pub suspended_until: Option<Option<i64>>,
    pub destroyed: Option<bool>,
}

impl AccountPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_is_partial() {
        let mut record = AccountRecord::new("a1", "a@example.com", "pw");
        record.proxy = Some("http://10.0.0.1:8080".into());
        record.apply(AccountPatch {
            user_agent: Some("Mozilla/5.0".into()),
            ..Default::default()
        });

        assert_eq!(record.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(record.proxy.as_deref(), Some("http://10.0.0.1:8080"));
        assert_eq!(record.email, "a@example.com");
    }

    #[test]
    fn test_apply_clears_nested_option() {
        let mut record = AccountRecord::new("a1", "a@example.com", "pw");
        record.proxy = Some("socks5://proxy".into());
        record.apply(AccountPatch {
            proxy: Some(None),
            ..Default::default()
        });
        assert!(record.proxy.is_none());
    }

    #[test]
    fn test_record_use_increments_once() {
        let mut record = AccountRecord::new("a1", "a@example.com", "pw");
        record.use_count = 4;
        record.apply(AccountPatch {
            record_use: Some(1_700_000_000),
            ..Default::default()
        });
        assert_eq!(record.use_count, 5);
        assert_eq!(record.last_use_time, 1_700_000_000);
    }

    #[test]
    fn test_eligibility() {
        let mut record = AccountRecord::new("a1", "a@example.com", "pw");
        assert!(record.is_eligible(100));

        record.suspended_until = Some(200);
        assert!(record.is_suspended(100));
        assert!(!record.is_eligible(100));
        assert!(record.is_eligible(200));

        let anonymous = AccountRecord::new("a2", "", "pw");
        assert!(!anonymous.is_eligible(100));
    }

    #[test]
    fn test_deserialize_legacy_shape() {
        let record: AccountRecord = serde_json::from_value(serde_json::json!({
            "id": "a1",
            "email": "a@example.com",
            "password": "pw",
            "ua": "Mozilla/5.0",
            "useCount": 3,
            "cookies": [{ "name": "__client", "value": "abc", "domain": "clerk.flux1.ai" }]
        }))
        .unwrap();

        assert_eq!(record.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(record.use_count, 3);
        assert_eq!(record.find_cookie("__client").unwrap().path, "/");
        assert!(!record.destroyed);
    }

    #[test]
    fn test_cookie_with_fractional_expiry() {
        let cookie: SessionCookie = serde_json::from_value(serde_json::json!({
            "name": "sb-access-token",
            "value": "v",
            "domain": ".pika.art",
            "expires": 1_700_000_000.25
        }))
        .unwrap();

        assert_eq!(cookie.expires, Some(1_700_000_000.25));
        let mut expected = SessionCookie::new("sb-access-token", "v", ".pika.art");
        expected.secure = false;
        expected.expires = Some(1_700_000_000.25);
        assert_eq!(cookie, expected);
    }
}
