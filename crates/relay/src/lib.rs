//! Relays CMS rule events to messaging topics.
//!
//! A [`TopicAction`] is rendered against an event into a [`RelayJob`];
//! the [`RelayHandler`] sends it through a client shared per endpoint and
//! credential, kept in a [`ferry_pool::KeyedResourcePool`].
//! [`HttpConnector`] delivers messages through the Service Bus REST API;
//! other transports plug in through [`ClientConnector`].

pub mod action;
pub mod client;
pub mod error;
pub mod event;
pub mod handler;
pub mod http;

pub use action::{RelayJob, TopicAction};
pub use client::{
    AmbientCredential, ClientConnector, ConnectOptions, Credential, EndpointKey,
    JSON_CONTENT_TYPE, RelayMessage, TopicClient, TopicConnection, TopicSender,
};
pub use error::{FieldError, RelayError, RelayResult};
pub use event::{EventFormatter, PlaceholderFormatter, RuleEvent};
pub use handler::{JobResult, RelayHandler};
pub use http::{ConfiguredToken, HttpConnector, shared_access_signature};
