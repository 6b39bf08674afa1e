//! Executes relay jobs through pooled topic clients.

use crate::action::RelayJob;
use crate::client::{
    AmbientCredential, ClientConnector, ConnectOptions, Credential, EndpointKey, RelayMessage,
    TopicClient,
};
use crate::error::RelayResult;
use ferry_core::config::{PoolConfig, RelayConfig};
use ferry_pool::KeyedResourcePool;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

/// Outcome of executing one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobResult {
    Complete,
    Failed(String),
}

impl JobResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, JobResult::Complete)
    }
}

type ClientPool = KeyedResourcePool<EndpointKey, Arc<TopicClient>>;

struct ClientFactory {
    connector: Arc<dyn ClientConnector>,
    ambient: OnceCell<Arc<dyn AmbientCredential>>,
    options: ConnectOptions,
}

impl ClientFactory {
    async fn credential(&self, key: &EndpointKey) -> RelayResult<Credential> {
        if let Some((name, secret)) = key.named_key() {
            return Ok(Credential::NamedKey {
                name: name.to_string(),
                key: secret.to_string(),
            });
        }

        let identity = self
            .ambient
            .get_or_try_init(|| self.connector.ambient_credential())
            .await?;
        Ok(Credential::Ambient(Arc::clone(identity)))
    }

    async fn create(&self, key: EndpointKey) -> RelayResult<Arc<TopicClient>> {
        let credential = self.credential(&key).await?;
        debug!(
            hostname = %key.hostname,
            topic = %key.topic_name,
            credential = ?credential,
            "Opening topic client"
        );

        let connection = self
            .connector
            .connect(&key.hostname, credential, &self.options)
            .await?;
        let sender = match connection
            .create_sender(&key.topic_name, &self.options.sender_identifier)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                if let Err(close) = connection.close().await {
                    warn!(hostname = %key.hostname, error = %close, "Failed to close connection");
                }
                return Err(e);
            }
        };

        Ok(Arc::new(TopicClient::new(connection, sender)))
    }
}

/// Sends relay jobs, sharing one client per endpoint key.
///
/// Clients live for the pool TTL; expired clients are closed in the
/// background.
pub struct RelayHandler {
    clients: ClientPool,
}

impl RelayHandler {
    /// Build a handler. Must be called inside a Tokio runtime.
    pub fn new(connector: Arc<dyn ClientConnector>, relay: &RelayConfig, pool: &PoolConfig) -> Self {
        let factory = Arc::new(ClientFactory {
            connector,
            ambient: OnceCell::new(),
            options: ConnectOptions {
                transport: relay.transport,
                sender_identifier: relay.sender_identifier.clone(),
            },
        });

        let clients = KeyedResourcePool::builder(move |key: EndpointKey| {
            let factory = Arc::clone(&factory);
            async move { factory.create(key).await }
        })
        .ttl(pool.ttl())
        .on_evict(
            |_pool: ClientPool, key: EndpointKey, client: Arc<TopicClient>| async move {
                debug!(
                    hostname = %key.hostname,
                    topic = %key.topic_name,
                    "Evicting topic client"
                );
                client.close().await
            },
        )
        .build();

        Self { clients }
    }

    /// Send the job's body to its topic.
    pub async fn execute(&self, job: &RelayJob) -> JobResult {
        debug!(
            hostname = %job.hostname,
            topic = %job.topic_name,
            correlation_id = %job.correlation_id,
            "Sending relay message"
        );

        let Some(body) = job.body.as_deref().filter(|b| !b.is_empty()) else {
            return JobResult::Complete;
        };

        let client = match self.clients.get_or_create(job.endpoint()).await {
            Ok(client) => client,
            Err(e) => {
                error!(hostname = %job.hostname, topic = %job.topic_name, error = %e, "Failed to open topic client");
                return JobResult::Failed(e.to_string());
            }
        };

        match client
            .send(RelayMessage::json(body, job.correlation_id.clone()))
            .await
        {
            Ok(()) => JobResult::Complete,
            Err(e) => {
                error!(
                    hostname = %job.hostname,
                    topic = %job.topic_name,
                    error = %e,
                    "Failed to send relay message"
                );
                JobResult::Failed(e.to_string())
            }
        }
    }

    /// Number of pooled clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Stop the pool and close every client it held.
    pub async fn shutdown(&self) {
        for (key, client) in self.clients.shutdown() {
            if let Err(e) = client.close().await {
                warn!(hostname = %key.hostname, topic = %key.topic_name, error = %e, "Failed to close topic client");
            }
        }
    }
}
