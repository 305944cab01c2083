//! Connection settings and endpoint addressing.
//!
//! # Design
//! `ConnectionConfig` is an explicit value handed to the client at
//! construction; nothing here is global. Host and database are never
//! defaulted: a blank value stops the call with
//! [`ApiError::MissingConfiguration`] before any request is built.

use std::env;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{ApiError, Result};

const API_ROOT: &str = "fmi/data/vLatest";

/// Everything except RFC 3986 unreserved characters is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a single path segment or query value.
pub(crate) fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, COMPONENT).to_string()
}

/// Account used to open Data API sessions.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Value for the `Authorization` header of the sessions endpoint.
    pub fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Coordinates of one hosted database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    scheme: String,
    host: String,
    database: String,
    credentials: Option<Credentials>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into().trim_end_matches('/').to_string(),
            database: database.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Override the URL scheme, e.g. `http` for a local stand-in server.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Load settings from `FM_HOST`, `FM_DATABASE`, `FM_USERNAME`,
    /// `FM_PASSWORD` and optional `FM_SCHEME`, reading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key-value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = present("FM_HOST").ok_or(ApiError::MissingConfiguration("host"))?;
        let database = present("FM_DATABASE").ok_or(ApiError::MissingConfiguration("database"))?;

        let mut config = Self::new(host, database);
        if let Some(scheme) = present("FM_SCHEME") {
            config = config.with_scheme(scheme);
        }
        if let (Some(user), Some(pass)) = (present("FM_USERNAME"), lookup("FM_PASSWORD")) {
            config = config.with_credentials(user, pass);
        }
        Ok(config)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or(ApiError::MissingConfiguration("credentials"))
    }

    /// Reject blank host or database.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ApiError::MissingConfiguration("host"));
        }
        if self.database.trim().is_empty() {
            return Err(ApiError::MissingConfiguration("database"));
        }
        Ok(())
    }

    /// `{scheme}://{host}/fmi/data/vLatest`
    pub fn base_url(&self) -> Result<String> {
        if self.host.trim().is_empty() {
            return Err(ApiError::MissingConfiguration("host"));
        }
        Ok(format!("{}://{}/{API_ROOT}", self.scheme, self.host))
    }

    /// URL of a host-level endpoint such as `productInfo`.
    pub fn endpoint(&self, path: &str) -> Result<String> {
        Ok(format!("{}/{path}", self.base_url()?))
    }

    /// URL under `databases/{db}/`, percent-encoding each segment.
    pub fn database_endpoint(&self, segments: &[&str]) -> Result<String> {
        self.validate()?;
        let mut url = format!("{}/databases/{}", self.base_url()?, encode_component(&self.database));
        for segment in segments {
            url.push('/');
            url.push_str(&encode_component(segment));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn database_endpoint_encodes_segments() {
        let config = ConnectionConfig::new("fm.example.com", "My Contacts");
        let url = config.database_endpoint(&["layouts", "People List"]).unwrap();
        assert_eq!(
            url,
            "https://fm.example.com/fmi/data/vLatest/databases/My%20Contacts/layouts/People%20List"
        );
    }

    #[test]
    fn host_endpoint_does_not_need_database() {
        let config = ConnectionConfig::new("fm.example.com", "");
        assert_eq!(
            config.endpoint("productInfo").unwrap(),
            "https://fm.example.com/fmi/data/vLatest/productInfo"
        );
        assert_eq!(
            config.database_endpoint(&["layouts"]).unwrap_err(),
            ApiError::MissingConfiguration("database")
        );
    }

    #[test]
    fn blank_host_is_a_hard_stop() {
        let config = ConnectionConfig::new("  ", "Contacts");
        assert_eq!(config.validate().unwrap_err(), ApiError::MissingConfiguration("host"));
        assert_eq!(config.endpoint("databases").unwrap_err(), ApiError::MissingConfiguration("host"));
    }

    #[test]
    fn scheme_override() {
        let config = ConnectionConfig::new("127.0.0.1:3000/", "Contacts").with_scheme("http");
        assert_eq!(config.base_url().unwrap(), "http://127.0.0.1:3000/fmi/data/vLatest");
    }

    #[test]
    fn basic_auth_header() {
        let creds = Credentials::new("admin", "secret");
        assert_eq!(creds.basic_auth(), "Basic YWRtaW46c2VjcmV0");
    }

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials::new("admin", "secret");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn from_lookup_requires_host_and_database() {
        let err = ConnectionConfig::from_lookup(lookup(&[("FM_DATABASE", "Contacts")])).unwrap_err();
        assert_eq!(err, ApiError::MissingConfiguration("host"));

        let err = ConnectionConfig::from_lookup(lookup(&[("FM_HOST", "fm.example.com")])).unwrap_err();
        assert_eq!(err, ApiError::MissingConfiguration("database"));
    }

    #[test]
    fn from_lookup_reads_all_keys() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            ("FM_HOST", "fm.example.com"),
            ("FM_DATABASE", "Contacts"),
            ("FM_USERNAME", "admin"),
            ("FM_PASSWORD", "secret"),
            ("FM_SCHEME", "http"),
        ]))
        .unwrap();
        assert_eq!(config.scheme(), "http");
        assert_eq!(config.credentials().unwrap().username(), "admin");
    }

    #[test]
    fn credentials_are_optional_until_used() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            ("FM_HOST", "fm.example.com"),
            ("FM_DATABASE", "Contacts"),
        ]))
        .unwrap();
        assert_eq!(
            config.credentials().unwrap_err(),
            ApiError::MissingConfiguration("credentials")
        );
    }
}
