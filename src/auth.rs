// SPDX-License-Identifier: MIT

//! Handshake authentication: extracts device identity from connection
//! metadata and validates it against the broker's device mapping and
//! optional credential list.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;

/// A single configured basic-auth credential pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// A catalogue record for a known device, looked up by origin.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: String,
}

/// The device mapping manager: knows which origins are currently mapped to
/// an active device and which credentials, if any, gate the listener.
#[async_trait]
pub trait DeviceMapping: Send + Sync {
    async fn known_devices(&self) -> HashSet<Arc<str>>;
    async fn get_auths(&self) -> Vec<Credential>;
}

/// The device catalogue: the broader set of devices the system knows
/// about, independent of whether the mapping manager has currently loaded
/// them. Used only to distinguish the "not loaded yet" case from "never
/// heard of this origin" in authentication advisories.
#[async_trait]
pub trait DeviceCatalogue: Send + Sync {
    async fn find(&self, origin: &str) -> Option<DeviceRecord>;
    async fn is_active(&self, device_id: &str) -> bool;
}

/// Why a handshake was rejected, carrying enough detail for the supervisor
/// to log a distinct advisory per rejection reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRejection {
    MissingOrigin,
    MappingUnconfigured { origin: Arc<str> },
    /// Origin exists in the device catalogue but the mapping manager has
    /// not (yet) loaded it.
    NotLoaded { origin: Arc<str> },
    /// Origin is absent from both the mapping manager and the catalogue.
    UnknownOrigin { origin: Arc<str> },
    MissingAuthorization { origin: Arc<str> },
    InvalidAuthorization { origin: Arc<str> },
}

impl AuthRejection {
    /// The origin involved, when one was successfully extracted.
    pub fn origin(&self) -> Option<&Arc<str>> {
        match self {
            Self::MissingOrigin => None,
            Self::MappingUnconfigured { origin }
            | Self::NotLoaded { origin }
            | Self::UnknownOrigin { origin }
            | Self::MissingAuthorization { origin }
            | Self::InvalidAuthorization { origin } => Some(origin),
        }
    }

    /// The advisory log message, distinguishing "not loaded" from "unknown"
    /// device origins.
    pub fn advisory(&self) -> &'static str {
        match self {
            Self::MissingOrigin => "handshake missing Origin header",
            Self::MappingUnconfigured { .. } => "device mapping manager is not configured",
            Self::NotLoaded { .. } => "device exists but mapping has not loaded it",
            Self::UnknownOrigin { .. } => "unknown device origin",
            Self::MissingAuthorization { .. } => "missing Authorization header",
            Self::InvalidAuthorization { .. } => "invalid Authorization credentials",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Accepted(Arc<str>),
    Rejected(AuthRejection),
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Constant-time comparison of two ASCII strings, used for Authorization
/// validation so mismatched credential length/content cannot be timed.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Decode a `Basic <base64>` Authorization header into `(username, password)`.
fn decode_basic(value: &str) -> Option<(String, String)> {
    use base64::Engine as _;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

/// Authenticates a handshake per the rule order: missing origin, then an
/// unconfigured mapping manager, then the known-devices/catalogue split,
/// then optional credential validation.
pub struct Authenticator;

impl Authenticator {
    pub async fn authenticate(
        headers: &HeaderMap,
        mapping: Option<&dyn DeviceMapping>,
        catalogue: &dyn DeviceCatalogue,
    ) -> AuthDecision {
        let origin = match header_str(headers, "origin") {
            Some(v) if !v.is_empty() => Arc::<str>::from(v),
            _ => return AuthDecision::Rejected(AuthRejection::MissingOrigin),
        };

        let mapping = match mapping {
            Some(m) => m,
            None => {
                return AuthDecision::Rejected(AuthRejection::MappingUnconfigured { origin });
            }
        };

        let known = mapping.known_devices().await;
        if !known.contains(&origin) {
            return if catalogue.find(&origin).await.is_some() {
                AuthDecision::Rejected(AuthRejection::NotLoaded { origin })
            } else {
                AuthDecision::Rejected(AuthRejection::UnknownOrigin { origin })
            };
        }

        let auths = mapping.get_auths().await;
        if !auths.is_empty() {
            let Some(raw) = header_str(headers, "authorization") else {
                return AuthDecision::Rejected(AuthRejection::MissingAuthorization { origin });
            };
            let Some((user, pass)) = decode_basic(raw) else {
                return AuthDecision::Rejected(AuthRejection::InvalidAuthorization { origin });
            };
            let valid = auths
                .iter()
                .any(|c| constant_time_eq(&c.username, &user) && constant_time_eq(&c.password, &pass));
            if !valid {
                return AuthDecision::Rejected(AuthRejection::InvalidAuthorization { origin });
            }
        }

        AuthDecision::Accepted(origin)
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
