// SPDX-License-Identifier: MIT

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::HeaderMap;

use super::*;

struct FakeMapping {
    known: HashSet<Arc<str>>,
    auths: Vec<Credential>,
}

#[async_trait]
impl DeviceMapping for FakeMapping {
    async fn known_devices(&self) -> HashSet<Arc<str>> {
        self.known.clone()
    }

    async fn get_auths(&self) -> Vec<Credential> {
        self.auths.clone()
    }
}

struct FakeCatalogue {
    catalogued: HashSet<String>,
}

#[async_trait]
impl DeviceCatalogue for FakeCatalogue {
    async fn find(&self, origin: &str) -> Option<DeviceRecord> {
        self.catalogued
            .contains(origin)
            .then(|| DeviceRecord { device_id: origin.to_owned() })
    }

    async fn is_active(&self, _device_id: &str) -> bool {
        true
    }
}

fn headers_with_origin(origin: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("origin", origin.parse().unwrap());
    headers
}

fn basic_auth_header(user: &str, pass: &str) -> String {
    use base64::Engine as _;
    let raw = format!("{user}:{pass}");
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
}

#[tokio::test]
async fn missing_origin_header_is_rejected() {
    let headers = HeaderMap::new();
    let mapping = FakeMapping { known: HashSet::new(), auths: vec![] };
    let catalogue = FakeCatalogue { catalogued: HashSet::new() };

    let decision = Authenticator::authenticate(&headers, Some(&mapping), &catalogue).await;
    assert_eq!(decision, AuthDecision::Rejected(AuthRejection::MissingOrigin));
}

#[tokio::test]
async fn unconfigured_mapping_is_rejected() {
    let headers = headers_with_origin("dev1");
    let catalogue = FakeCatalogue { catalogued: HashSet::new() };

    let decision = Authenticator::authenticate(&headers, None, &catalogue).await;
    assert_eq!(
        decision,
        AuthDecision::Rejected(AuthRejection::MappingUnconfigured { origin: Arc::from("dev1") })
    );
}

#[tokio::test]
async fn device_in_catalogue_but_not_loaded_is_rejected_as_not_loaded() {
    let headers = headers_with_origin("dev1");
    let mapping = FakeMapping { known: HashSet::new(), auths: vec![] };
    let catalogue = FakeCatalogue { catalogued: HashSet::from(["dev1".to_owned()]) };

    let decision = Authenticator::authenticate(&headers, Some(&mapping), &catalogue).await;
    assert_eq!(
        decision,
        AuthDecision::Rejected(AuthRejection::NotLoaded { origin: Arc::from("dev1") })
    );
}

#[tokio::test]
async fn device_in_neither_mapping_nor_catalogue_is_rejected_as_unknown() {
    let headers = headers_with_origin("dev1");
    let mapping = FakeMapping { known: HashSet::new(), auths: vec![] };
    let catalogue = FakeCatalogue { catalogued: HashSet::new() };

    let decision = Authenticator::authenticate(&headers, Some(&mapping), &catalogue).await;
    assert_eq!(
        decision,
        AuthDecision::Rejected(AuthRejection::UnknownOrigin { origin: Arc::from("dev1") })
    );
}

#[tokio::test]
async fn known_device_with_no_configured_auths_is_accepted() {
    let headers = headers_with_origin("dev1");
    let mapping = FakeMapping { known: HashSet::from([Arc::from("dev1")]), auths: vec![] };
    let catalogue = FakeCatalogue { catalogued: HashSet::new() };

    let decision = Authenticator::authenticate(&headers, Some(&mapping), &catalogue).await;
    assert_eq!(decision, AuthDecision::Accepted(Arc::from("dev1")));
}

#[tokio::test]
async fn configured_auth_rejects_missing_authorization_header() {
    let headers = headers_with_origin("dev1");
    let mapping = FakeMapping {
        known: HashSet::from([Arc::from("dev1")]),
        auths: vec![Credential { username: "u".into(), password: "p".into() }],
    };
    let catalogue = FakeCatalogue { catalogued: HashSet::new() };

    let decision = Authenticator::authenticate(&headers, Some(&mapping), &catalogue).await;
    assert_eq!(
        decision,
        AuthDecision::Rejected(AuthRejection::MissingAuthorization { origin: Arc::from("dev1") })
    );
}

#[tokio::test]
async fn configured_auth_accepts_valid_basic_credentials() {
    let mut headers = headers_with_origin("dev1");
    headers.insert("authorization", basic_auth_header("u", "p").parse().unwrap());
    let mapping = FakeMapping {
        known: HashSet::from([Arc::from("dev1")]),
        auths: vec![Credential { username: "u".into(), password: "p".into() }],
    };
    let catalogue = FakeCatalogue { catalogued: HashSet::new() };

    let decision = Authenticator::authenticate(&headers, Some(&mapping), &catalogue).await;
    assert_eq!(decision, AuthDecision::Accepted(Arc::from("dev1")));
}

#[tokio::test]
async fn configured_auth_rejects_wrong_password() {
    let mut headers = headers_with_origin("dev1");
    headers.insert("authorization", basic_auth_header("u", "wrong").parse().unwrap());
    let mapping = FakeMapping {
        known: HashSet::from([Arc::from("dev1")]),
        auths: vec![Credential { username: "u".into(), password: "p".into() }],
    };
    let catalogue = FakeCatalogue { catalogued: HashSet::new() };

    let decision = Authenticator::authenticate(&headers, Some(&mapping), &catalogue).await;
    assert_eq!(
        decision,
        AuthDecision::Rejected(AuthRejection::InvalidAuthorization { origin: Arc::from("dev1") })
    );
}
