//! Traits for pairing transport.

use crate::channel::EncryptedChannel;
use async_trait::async_trait;
use homekit_core::{Result, Stage};
use std::fmt;

/// Content type of pairing request and response bodies.
pub const PAIRING_CONTENT_TYPE: &str = "application/pairing+tlv8";

/// Content type of application (accessory database) bodies.
pub const HAP_JSON_CONTENT_TYPE: &str = "application/hap+json";

/// Accessory HTTP resources used by the pairing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    PairSetup,
    PairVerify,
    Pairings,
    Identify,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::PairSetup => "/pair-setup",
            Endpoint::PairVerify => "/pair-verify",
            Endpoint::Pairings => "/pairings",
            Endpoint::Identify => "/identify",
        }
    }

    /// Stage blamed for transport failures on this endpoint.
    pub fn stage(self) -> Stage {
        match self {
            Endpoint::PairSetup => Stage::PairSetup(1),
            Endpoint::PairVerify => Stage::PairVerify(1),
            Endpoint::Identify => Stage::Identify,
            Endpoint::Pairings => Stage::Session,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// HTTP request methods accessories accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request sent over an encrypted session.
///
/// Bodies are opaque; only the method, path and content type are framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: HttpMethod,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Request {
    /// `GET` without a body.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            content_type: None,
            body: Vec::new(),
        }
    }

    /// `PUT` with a `hap+json` body.
    pub fn put(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::with_body(HttpMethod::Put, path, body)
    }

    /// `POST` with a `hap+json` body.
    pub fn post(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::with_body(HttpMethod::Post, path, body)
    }

    /// TLV8 `POST` to a pairing endpoint.
    pub fn pairing(endpoint: Endpoint, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: endpoint.path().to_string(),
            content_type: Some(PAIRING_CONTENT_TYPE.to_string()),
            body: body.into(),
        }
    }

    /// `GET /characteristics?id=aid.iid,...`
    pub fn get_characteristics(ids: &[(u64, u64)]) -> Self {
        let ids: Vec<String> = ids
            .iter()
            .map(|(aid, iid)| format!("{}.{}", aid, iid))
            .collect();
        Self::get(format!("/characteristics?id={}", ids.join(",")))
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn with_body(method: HttpMethod, path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method,
            path: path.into(),
            content_type: Some(HAP_JSON_CONTENT_TYPE.to_string()),
            body: body.into(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Transport for sending requests to one accessory.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// POST a plaintext TLV8 body and return the response body.
    async fn post(&mut self, endpoint: Endpoint, body: &[u8]) -> Result<Vec<u8>>;

    /// Send a request over an established session, framing through `channel`.
    async fn send_encrypted(
        &mut self,
        channel: &mut EncryptedChannel,
        request: &Request,
    ) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    mod endpoints {
        use super::*;

        #[test]
        fn paths() {
            assert_eq!(Endpoint::PairSetup.path(), "/pair-setup");
            assert_eq!(Endpoint::PairVerify.path(), "/pair-verify");
            assert_eq!(Endpoint::Pairings.path(), "/pairings");
            assert_eq!(Endpoint::Identify.path(), "/identify");
            assert_eq!(Endpoint::Pairings.to_string(), "/pairings");
        }

        #[test]
        fn stages() {
            assert_eq!(Endpoint::PairSetup.stage(), Stage::PairSetup(1));
            assert_eq!(Endpoint::Identify.stage(), Stage::Identify);
            assert_eq!(Endpoint::Pairings.stage(), Stage::Session);
        }
    }

    mod requests {
        use super::*;

        #[test]
        fn get_has_no_body_or_content_type() {
            let request = Request::get("/accessories");
            assert_eq!(request.method, HttpMethod::Get);
            assert_eq!(request.path, "/accessories");
            assert!(request.content_type.is_none());
            assert!(request.body.is_empty());
            assert_eq!(request.to_string(), "GET /accessories");
        }

        #[test]
        fn application_bodies_are_hap_json() {
            let request = Request::put("/characteristics", br#"{"characteristics":[]}"#.to_vec());
            assert_eq!(request.method, HttpMethod::Put);
            assert_eq!(request.content_type.as_deref(), Some(HAP_JSON_CONTENT_TYPE));
        }

        #[test]
        fn pairing_requests_are_tlv_posts() {
            let request = Request::pairing(Endpoint::Pairings, vec![0x06, 0x01, 0x01]);
            assert_eq!(request.method, HttpMethod::Post);
            assert_eq!(request.path, "/pairings");
            assert_eq!(request.content_type.as_deref(), Some(PAIRING_CONTENT_TYPE));
        }

        #[test]
        fn characteristic_ids_build_query() {
            let request = Request::get_characteristics(&[(1, 4), (1, 10)]);
            assert_eq!(request.path, "/characteristics?id=1.4,1.10");
        }

        #[test]
        fn content_type_can_be_overridden() {
            let request = Request::post("/prepare", b"{}".to_vec()).with_content_type("text/plain");
            assert_eq!(request.content_type.as_deref(), Some("text/plain"));
        }
    }

    mod mock_transport {
        use super::*;

        #[tokio::test]
        async fn mock_post_returns_configured_response() {
            let mut mock = MockTransport::new();

            let expected_response = vec![0x06, 0x01, 0x02]; // State=2
            let expected_clone = expected_response.clone();

            mock.expect_post()
                .withf(|endpoint, _| *endpoint == Endpoint::PairSetup)
                .returning(move |_, _| {
                    Box::pin({
                        let resp = expected_clone.clone();
                        async move { Ok(resp) }
                    })
                });

            let result = mock
                .post(Endpoint::PairSetup, &[0x06, 0x01, 0x01])
                .await
                .unwrap();
            assert_eq!(result, expected_response);
        }
    }
}
