//! Static bearer token decoded once from the Supabase login cookie.

use async_trait::async_trait;
use genpool_accounts::{AccountPatch, AccountRecord};
use genpool_core::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

use super::AuthMaterial;

/// Cookie holding the URL-encoded Supabase session JSON.
pub const LOGIN_COOKIE: &str = "sb-login-auth-token";

#[derive(Debug, Default, Deserialize)]
struct LoginPayload {
    access_token: Option<String>,
    user: Option<LoginUser>,
}

#[derive(Debug, Default, Deserialize)]
struct LoginUser {
    id: Option<String>,
}

/// Long-lived access token and user id carried by the login cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseToken {
    pub access_token: String,
    pub user_id: String,
}

impl SupabaseToken {
    /// Decode a cookie value of the form `urlencode({"access_token":..,"user":{"id":..}})`.
    pub fn decode(cookie_value: &str) -> Result<Self> {
        let decoded = urlencoding::decode(cookie_value)
            .map_err(|e| Error::SessionIncomplete(format!("login token is not UTF-8: {}", e)))?;
        let payload: LoginPayload = serde_json::from_str(&decoded).unwrap_or_default();

        let access_token = payload
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::SessionIncomplete("login token not found".into()))?;
        let user_id = payload
            .user
            .and_then(|u| u.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::SessionIncomplete("login user id not found".into()))?;

        Ok(Self {
            access_token,
            user_id,
        })
    }

    pub fn from_record(record: &AccountRecord) -> Result<Self> {
        let cookie = record
            .find_cookie(LOGIN_COOKIE)
            .ok_or_else(|| Error::SessionIncomplete("login token not found".into()))?;
        Self::decode(&cookie.value)
    }

    pub fn to_patch(&self) -> AccountPatch {
        AccountPatch {
            token: Some(Some(self.access_token.clone())),
            user_id: Some(Some(self.user_id.clone())),
            ..Default::default()
        }
    }
}

/// `Authorization: Bearer <token>` from the record's derived token.
pub struct BearerAuth;

#[async_trait]
impl AuthMaterial for BearerAuth {
    async fn headers(&self, record: &AccountRecord) -> Result<HeaderMap> {
        let token = record
            .token
            .as_deref()
            .ok_or_else(|| Error::SessionIncomplete("access token not derived".into()))?;
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| Error::SessionIncomplete(format!("access token unusable: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }
}
