//! Pull-based queue source and its AWS SQS implementation

use crate::client::SourceError;
use async_trait::async_trait;
use aws_sdk_sqs::{types::MessageSystemAttributeName, Client};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

/// Attribute carrying the enqueue time in epoch milliseconds
pub const SENT_TIMESTAMP_ATTRIBUTE: &str = "SentTimestamp";

/// One message received from a queue
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueMessage {
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
}

impl QueueMessage {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
pub trait QueueClientTrait: Send + Sync {
    /// Receive up to `max_messages`, waiting at most `wait` for the first one
    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
        attribute_names: &[&str],
    ) -> Result<Vec<QueueMessage>, SourceError>;
}

#[async_trait]
impl QueueClientTrait for Client {
    async fn receive(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait: Duration,
        attribute_names: &[&str],
    ) -> Result<Vec<QueueMessage>, SourceError> {
        let mut req = self
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait.as_secs() as i32);
        for name in attribute_names {
            req = req.message_system_attribute_names(MessageSystemAttributeName::from(*name));
        }

        let response = req
            .send()
            .await
            .map_err(|e| SourceError::Other(format!("sqs receive message: {}", e)))?;

        Ok(response
            .messages()
            .iter()
            .map(|m| QueueMessage {
                body: Bytes::copy_from_slice(m.body().unwrap_or_default().as_bytes()),
                attributes: m
                    .attributes()
                    .map(|attrs| {
                        attrs
                            .iter()
                            .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect())
    }
}

/// Build an SQS client for `region`, optionally with static credentials
pub async fn connect_sqs(
    region: &str,
    credentials: Option<aws_credential_types::Credentials>,
) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));
    if let Some(creds) = credentials {
        loader = loader.credentials_provider(creds);
    }
    Client::new(&loader.load().await)
}
