//! Topic clients and the connector seam that builds them.

use crate::error::RelayResult;
use async_trait::async_trait;
use ferry_core::config::RelayTransport;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Content type of every relayed message.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Identifies one pooled client: endpoint, topic and credential pair.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub hostname: String,
    pub topic_name: String,
    pub access_key_name: Option<String>,
    pub access_key: Option<String>,
}

impl EndpointKey {
    /// Named key pair, when both halves are present.
    pub fn named_key(&self) -> Option<(&str, &str)> {
        let name = self.access_key_name.as_deref().filter(|v| !v.is_empty())?;
        let key = self.access_key.as_deref().filter(|v| !v.is_empty())?;
        Some((name, key))
    }
}

impl fmt::Debug for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointKey")
            .field("hostname", &self.hostname)
            .field("topic_name", &self.topic_name)
            .field("access_key_name", &self.access_key_name)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Identity resolved from the process environment.
#[async_trait]
pub trait AmbientCredential: Send + Sync + fmt::Debug {
    /// Short description for logs, e.g. the identity source.
    fn describe(&self) -> String;

    /// Token presented as `Authorization: Bearer <token>`.
    async fn bearer_token(&self) -> RelayResult<String>;
}

/// Credential a connection authenticates with.
#[derive(Clone)]
pub enum Credential {
    NamedKey { name: String, key: String },
    Ambient(Arc<dyn AmbientCredential>),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::NamedKey { name, .. } => f
                .debug_struct("NamedKey")
                .field("name", name)
                .finish_non_exhaustive(),
            Credential::Ambient(identity) => f.debug_tuple("Ambient").field(identity).finish(),
        }
    }
}

/// Options applied to every connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    pub transport: RelayTransport,
    /// Identifier attached to every sender.
    pub sender_identifier: String,
}

/// One message sent to a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayMessage {
    pub body: Vec<u8>,
    pub content_type: String,
    pub correlation_id: String,
}

impl RelayMessage {
    pub fn json(body: &str, correlation_id: impl Into<String>) -> Self {
        Self {
            body: body.as_bytes().to_vec(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Sends messages to one topic.
#[async_trait]
pub trait TopicSender: Send + Sync {
    async fn send(&self, message: RelayMessage) -> RelayResult<()>;

    async fn close(&self) -> RelayResult<()>;
}

/// An open connection to a messaging endpoint.
#[async_trait]
pub trait TopicConnection: Send + Sync {
    async fn create_sender(
        &self,
        topic_name: &str,
        identifier: &str,
    ) -> RelayResult<Box<dyn TopicSender>>;

    async fn close(&self) -> RelayResult<()>;
}

/// Opens connections to messaging endpoints.
#[async_trait]
pub trait ClientConnector: Send + Sync + 'static {
    /// Resolve the process identity used when no named key is configured.
    async fn ambient_credential(&self) -> RelayResult<Arc<dyn AmbientCredential>>;

    async fn connect(
        &self,
        hostname: &str,
        credential: Credential,
        options: &ConnectOptions,
    ) -> RelayResult<Box<dyn TopicConnection>>;
}

/// A connection and the sender opened on it.
pub struct TopicClient {
    connection: Box<dyn TopicConnection>,
    sender: Box<dyn TopicSender>,
}

impl TopicClient {
    pub fn new(connection: Box<dyn TopicConnection>, sender: Box<dyn TopicSender>) -> Self {
        Self { connection, sender }
    }

    pub async fn send(&self, message: RelayMessage) -> RelayResult<()> {
        self.sender.send(message).await
    }

    /// Close the sender, then the connection.
    ///
    /// The connection is closed even if closing the sender failed; the
    /// first error is returned.
    pub async fn close(&self) -> RelayResult<()> {
        let sender = self.sender.close().await;
        let connection = self.connection.close().await;
        debug!(
            sender_ok = sender.is_ok(),
            connection_ok = connection.is_ok(),
            "Closed topic client"
        );
        sender.and(connection)
    }
}

impl fmt::Debug for TopicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicClient").finish_non_exhaustive()
    }
}
