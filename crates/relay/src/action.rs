//! Topic actions and the relay jobs created from them.

use crate::client::EndpointKey;
use crate::error::{FieldError, RelayError, RelayResult};
use crate::event::{EventFormatter, RuleEvent};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

static TOPIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9]{2,}(\-[a-z0-9]+)*$").expect("valid topic name regex")
});

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Rule action publishing events to a messaging topic.
///
/// `hostname`, `topic_name` and `payload` are templates rendered against
/// the triggering event. Leaving both access key fields empty selects the
/// ambient identity of the process.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TopicAction {
    pub hostname: String,
    pub topic_name: String,
    #[serde(default)]
    pub access_key_name: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    /// Message body template. Empty sends the full event envelope.
    #[serde(default)]
    pub payload: Option<String>,
}

impl fmt::Debug for TopicAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicAction")
            .field("hostname", &self.hostname)
            .field("topic_name", &self.topic_name)
            .field("access_key_name", &self.access_key_name)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("payload", &self.payload)
            .finish()
    }
}

impl TopicAction {
    /// Check the action, reporting every invalid field.
    pub fn validate(&self) -> RelayResult<()> {
        let mut errors = Vec::new();

        if self.topic_name.trim().is_empty() {
            errors.push(FieldError::new("topic_name", "topic name must not be empty"));
        } else if !TOPIC_NAME.is_match(&self.topic_name) {
            errors.push(FieldError::new(
                "topic_name",
                "topic must be a valid topic name",
            ));
        }

        let has_key = non_empty(self.access_key.as_deref()).is_some();
        let has_key_name = non_empty(self.access_key_name.as_deref()).is_some();
        if has_key != has_key_name {
            errors.push(FieldError::new(
                "access_key",
                "access key and access key name must be both empty or both filled",
            ));
        }

        if self.hostname.is_empty() {
            errors.push(FieldError::new("hostname", "hostname must not be empty"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Validation(errors))
        }
    }

    /// Render the action for `event` into a job and its description.
    pub fn create_job(
        &self,
        event: &RuleEvent,
        formatter: &dyn EventFormatter,
    ) -> RelayResult<(String, RelayJob)> {
        let topic_name = formatter.format(&self.topic_name, event)?;
        let hostname = formatter.format(&self.hostname, event)?;

        let body = match non_empty(self.payload.as_deref()) {
            Some(template) => formatter.format(template, event)?,
            None => formatter.to_envelope_json(event)?,
        };

        let correlation_id = Uuid::new_v4().simple().to_string();
        let description = format!("Send RelayJob to topic '{topic_name}' - {correlation_id}");

        let job = RelayJob {
            correlation_id,
            hostname,
            topic_name,
            access_key_name: non_empty(self.access_key_name.as_deref()).map(str::to_string),
            access_key: non_empty(self.access_key.as_deref()).map(str::to_string),
            body: Some(body),
        };
        Ok((description, job))
    }
}

/// A rendered message waiting to be sent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayJob {
    pub correlation_id: String,
    pub hostname: String,
    pub topic_name: String,
    pub access_key_name: Option<String>,
    pub access_key: Option<String>,
    pub body: Option<String>,
}

impl RelayJob {
    /// Pool key of the client this job is sent through.
    pub fn endpoint(&self) -> EndpointKey {
        EndpointKey {
            hostname: self.hostname.clone(),
            topic_name: self.topic_name.clone(),
            access_key_name: self.access_key_name.clone(),
            access_key: self.access_key.clone(),
        }
    }
}

impl fmt::Debug for RelayJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayJob")
            .field("correlation_id", &self.correlation_id)
            .field("hostname", &self.hostname)
            .field("topic_name", &self.topic_name)
            .field("access_key_name", &self.access_key_name)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("body_len", &self.body.as_ref().map(String::len))
            .finish()
    }
}
