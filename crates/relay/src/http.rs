//! Service Bus REST transport.
//!
//! Messages are posted to `{scheme}://{hostname}/{topic}/messages`. Named
//! keys sign a shared access signature for every request; ambient
//! identities present a bearer token. The scheme comes from
//! [`RelayTransport`](ferry_core::config::RelayTransport).

use crate::client::{
    AmbientCredential, ClientConnector, ConnectOptions, Credential, RelayMessage,
    TopicConnection, TopicSender,
};
use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use ferry_core::config::RelayConfig;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

/// Characters left as-is when encoding signed values.
const SIGNATURE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Header carrying system properties such as the correlation id.
pub const BROKER_PROPERTIES_HEADER: &str = "brokerproperties";

/// Custom message property naming the sender.
pub const SENDER_HEADER: &str = "sender";

type HmacSha256 = Hmac<Sha256>;

/// Build a shared access signature for `resource_uri`.
///
/// `expiry` is in unix seconds.
pub fn shared_access_signature(
    resource_uri: &str,
    key_name: &str,
    key: &str,
    expiry: i64,
) -> RelayResult<String> {
    let resource = utf8_percent_encode(&resource_uri.to_lowercase(), SIGNATURE_ENCODE_SET)
        .to_string();
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| RelayError::Credential(e.to_string()))?;
    mac.update(format!("{resource}\n{expiry}").as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={resource}&sig={}&se={expiry}&skn={key_name}",
        utf8_percent_encode(&signature, SIGNATURE_ENCODE_SET)
    ))
}

/// Bearer token taken from `relay.bearer_token`.
pub struct ConfiguredToken {
    token: String,
}

impl fmt::Debug for ConfiguredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConfiguredToken").field(&"<redacted>").finish()
    }
}

#[async_trait]
impl AmbientCredential for ConfiguredToken {
    fn describe(&self) -> String {
        "configured bearer token".to_string()
    }

    async fn bearer_token(&self) -> RelayResult<String> {
        Ok(self.token.clone())
    }
}

/// Opens topic clients against Service Bus namespaces over HTTP(S).
#[derive(Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    bearer_token: Option<String>,
    sas_ttl: Duration,
}

impl HttpConnector {
    pub fn new(config: &RelayConfig) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            bearer_token: config.bearer_token.clone(),
            sas_ttl: config.sas_ttl(),
        })
    }
}

impl fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnector")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("sas_ttl", &self.sas_ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClientConnector for HttpConnector {
    async fn ambient_credential(&self) -> RelayResult<Arc<dyn AmbientCredential>> {
        let token = self.bearer_token.clone().ok_or_else(|| {
            RelayError::Credential("no access key given and relay.bearer_token is not set".into())
        })?;
        Ok(Arc::new(ConfiguredToken { token }))
    }

    async fn connect(
        &self,
        hostname: &str,
        credential: Credential,
        options: &ConnectOptions,
    ) -> RelayResult<Box<dyn TopicConnection>> {
        let base = Url::parse(&format!("{}://{}/", options.transport.scheme(), hostname))
            .map_err(|e| RelayError::Connect {
                hostname: hostname.to_string(),
                message: e.to_string(),
            })?;
        debug!(endpoint = %base, "Prepared relay endpoint");

        Ok(Box::new(HttpConnection {
            http: self.http.clone(),
            base,
            credential,
            sas_ttl: self.sas_ttl,
        }))
    }
}

struct HttpConnection {
    http: reqwest::Client,
    base: Url,
    credential: Credential,
    sas_ttl: Duration,
}

impl HttpConnection {
    fn join(&self, path: &str) -> RelayResult<Url> {
        self.base.join(path).map_err(|e| RelayError::Connect {
            hostname: self.base.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl TopicConnection for HttpConnection {
    async fn create_sender(
        &self,
        topic_name: &str,
        identifier: &str,
    ) -> RelayResult<Box<dyn TopicSender>> {
        let resource = self.join(topic_name)?;
        let url = self.join(&format!("{topic_name}/messages"))?;
        Ok(Box::new(HttpSender {
            http: self.http.clone(),
            url,
            resource: resource.to_string(),
            credential: self.credential.clone(),
            sas_ttl: self.sas_ttl,
            identifier: identifier.to_string(),
        }))
    }

    // Sockets belong to the shared reqwest pool.
    async fn close(&self) -> RelayResult<()> {
        Ok(())
    }
}

struct HttpSender {
    http: reqwest::Client,
    url: Url,
    resource: String,
    credential: Credential,
    sas_ttl: Duration,
    identifier: String,
}

impl HttpSender {
    async fn authorization(&self) -> RelayResult<String> {
        match &self.credential {
            Credential::NamedKey { name, key } => {
                let ttl = i64::try_from(self.sas_ttl.as_secs()).unwrap_or(i64::MAX);
                let expiry = OffsetDateTime::now_utc().unix_timestamp().saturating_add(ttl);
                shared_access_signature(&self.resource, name, key, expiry)
            }
            Credential::Ambient(identity) => {
                Ok(format!("Bearer {}", identity.bearer_token().await?))
            }
        }
    }
}

#[async_trait]
impl TopicSender for HttpSender {
    async fn send(&self, message: RelayMessage) -> RelayResult<()> {
        let authorization = self.authorization().await?;
        let broker_properties =
            serde_json::json!({ "CorrelationId": message.correlation_id }).to_string();

        let response = self
            .http
            .post(self.url.clone())
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, message.content_type)
            .header(BROKER_PROPERTIES_HEADER, broker_properties)
            .header(SENDER_HEADER, self.identifier.as_str())
            .body(message.body)
            .send()
            .await
            .map_err(|e| RelayError::Send(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Send(format!("{status}: {body}")));
        }
        debug!(url = %self.url, correlation_id = %message.correlation_id, "Relay message accepted");
        Ok(())
    }

    async fn close(&self) -> RelayResult<()> {
        Ok(())
    }
}
