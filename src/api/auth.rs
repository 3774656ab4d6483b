// MangaShelf - Offline Manga Reader for Handheld Devices
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Server credentials and the `Authorization` header they produce
//!
//! Self-hosted library servers are either open, behind basic auth, or behind a bearer
//! token issued by the shell's login flow.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bearer token with its expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// The actual token string
    pub token: String,

    /// When this token expires, if the server told us
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// True when the token is past its expiry (tokens without expiry never expire)
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| at <= Utc::now())
    }
}

/// How requests to the library server are authenticated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum AuthConfig {
    /// Open server
    None,
    /// HTTP basic auth
    Basic { username: String, password: String },
    /// Bearer token
    Bearer(AccessToken),
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::None
    }
}

impl AuthConfig {
    /// Value for the `Authorization` header, `None` for open servers
    pub fn header_value(&self) -> Option<String> {
        match self {
            AuthConfig::None => None,
            AuthConfig::Basic { username, password } => {
                let credentials = STANDARD.encode(format!("{}:{}", username, password));
                Some(format!("Basic {}", credentials))
            }
            AuthConfig::Bearer(token) => Some(format!("Bearer {}", token.token)),
        }
    }

    /// Whether the shell has to refresh credentials before the next request
    pub fn needs_refresh(&self) -> bool {
        matches!(self, AuthConfig::Bearer(token) if token.is_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header() {
        let auth = AuthConfig::Basic {
            username: "reader".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(auth.header_value().unwrap(), "Basic cmVhZGVyOnNlY3JldA==");
    }

    #[test]
    fn test_open_server_has_no_header() {
        assert_eq!(AuthConfig::None.header_value(), None);
    }

    #[test]
    fn test_expired_bearer_needs_refresh() {
        let auth = AuthConfig::Bearer(AccessToken {
            token: "abc".to_string(),
            expires_at: Some(Utc::now() - chrono::Duration::seconds(5)),
        });
        assert!(auth.needs_refresh());
        assert_eq!(auth.header_value().unwrap(), "Bearer abc");
    }
}
