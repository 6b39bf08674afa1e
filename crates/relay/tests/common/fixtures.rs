use async_trait::async_trait;
use ferry_relay::{
    AmbientCredential, ClientConnector, ConnectOptions, Credential, RelayError, RelayMessage,
    RelayResult, TopicConnection, TopicSender,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug)]
pub struct EnvIdentity;

#[async_trait]
impl AmbientCredential for EnvIdentity {
    fn describe(&self) -> String {
        "environment".to_string()
    }

    async fn bearer_token(&self) -> RelayResult<String> {
        Ok("environment-token".to_string())
    }
}

/// Everything the fake transport observed, in order.
#[derive(Default)]
pub struct Recorder {
    pub connects: Mutex<Vec<(String, String)>>,
    pub messages: Mutex<Vec<(String, RelayMessage)>>,
    pub closes: Mutex<Vec<String>>,
    pub ambient_resolves: AtomicUsize,
    pub fail_sends: AtomicBool,
}

impl Recorder {
    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub fn closes(&self) -> Vec<String> {
        self.closes.lock().clone()
    }
}

#[derive(Clone, Default)]
pub struct RecordingConnector {
    pub recorder: Arc<Recorder>,
}

#[async_trait]
impl ClientConnector for RecordingConnector {
    async fn ambient_credential(&self) -> RelayResult<Arc<dyn AmbientCredential>> {
        self.recorder.ambient_resolves.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EnvIdentity))
    }

    async fn connect(
        &self,
        hostname: &str,
        credential: Credential,
        options: &ConnectOptions,
    ) -> RelayResult<Box<dyn TopicConnection>> {
        let kind = match &credential {
            Credential::NamedKey { name, .. } => format!("key:{name}"),
            Credential::Ambient(identity) => format!("ambient:{}", identity.describe()),
        };
        self.recorder
            .connects
            .lock()
            .push((hostname.to_string(), kind));
        Ok(Box::new(FakeConnection {
            hostname: hostname.to_string(),
            identifier: options.sender_identifier.clone(),
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

struct FakeConnection {
    hostname: String,
    identifier: String,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl TopicConnection for FakeConnection {
    async fn create_sender(
        &self,
        topic_name: &str,
        identifier: &str,
    ) -> RelayResult<Box<dyn TopicSender>> {
        assert_eq!(identifier, self.identifier);
        Ok(Box::new(FakeSender {
            topic: format!("{}/{}", self.hostname, topic_name),
            recorder: Arc::clone(&self.recorder),
        }))
    }

    async fn close(&self) -> RelayResult<()> {
        self.recorder
            .closes
            .lock()
            .push(format!("connection:{}", self.hostname));
        Ok(())
    }
}

struct FakeSender {
    topic: String,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl TopicSender for FakeSender {
    async fn send(&self, message: RelayMessage) -> RelayResult<()> {
        if self.recorder.fail_sends.load(Ordering::SeqCst) {
            return Err(RelayError::Send("topic unavailable".to_string()));
        }
        self.recorder
            .messages
            .lock()
            .push((self.topic.clone(), message));
        Ok(())
    }

    async fn close(&self) -> RelayResult<()> {
        self.recorder
            .closes
            .lock()
            .push(format!("sender:{}", self.topic));
        Ok(())
    }
}
