// Pub/Sub v1 REST backend.
// Works against the local emulator (plain HTTP, no credentials) or a real
// endpoint when a bearer token is supplied. Message data travels base64-encoded.
// Resource ids are checked against the broker's naming rules and pushed as
// single escaped path segments, so an id can never step outside its project.
use crate::{
    BrokerClient, BrokerConnector, BrokerError, Code, OutboundMessage, ReceivedMessage, Result,
    SubscriptionRef, TopicRef,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const LIST_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct RestConnector {
    base_url: String,
    base: Url,
    access_token: Option<String>,
    http: reqwest::Client,
}

impl RestConnector {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| BrokerError::new(Code::Internal, format!("build http client: {err}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url).map_err(|err| {
            BrokerError::new(
                Code::InvalidArgument,
                format!("invalid broker url {base_url:?}: {err}"),
            )
        })?;
        if base.cannot_be_a_base() {
            return Err(BrokerError::new(
                Code::InvalidArgument,
                format!("broker url {base_url:?} cannot carry a path"),
            ));
        }
        Ok(Self {
            base_url,
            base,
            access_token,
            http,
        })
    }

    /// Connector for a `PUBSUB_EMULATOR_HOST` style `host:port` value.
    pub fn emulator(host: &str) -> Result<Self> {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        Self::new(base, None)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BrokerConnector for RestConnector {
    async fn connect(&self, project_id: &str) -> Result<Arc<dyn BrokerClient>> {
        if project_id.is_empty() || project_id.contains('/') || matches!(project_id, "." | "..") {
            return Err(BrokerError::new(
                Code::InvalidArgument,
                format!("invalid project id {project_id:?}"),
            ));
        }
        Ok(Arc::new(RestClient {
            project_id: project_id.to_string(),
            connector: self.clone(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "rest"
    }
}

#[derive(Debug, Clone)]
pub struct RestClient {
    project_id: String,
    connector: RestConnector,
}

#[derive(Debug, Deserialize)]
struct TopicResource {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTopicsResponse {
    #[serde(default)]
    topics: Vec<TopicResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubscriptionBody {
    topic: String,
}

#[derive(Debug, Serialize)]
struct PublishBody {
    messages: Vec<WireOutbound>,
}

#[derive(Debug, Serialize)]
struct WireOutbound {
    data: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullBody {
    max_messages: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceived>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceived {
    ack_id: String,
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    message_id: String,
    publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AckBody<'a> {
    ack_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Checks a topic or subscription id against the broker's naming rules:
/// 3 to 255 characters, starting with a letter, drawn from letters, digits
/// and `-_.~+`. `%` is refused so nothing decodes into a separator.
pub fn validate_resource_id(kind: &str, id: &str) -> Result<()> {
    let valid = (3..=255).contains(&id.len())
        && id.starts_with(|c: char| c.is_ascii_alphabetic())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '+'));
    if valid {
        Ok(())
    } else {
        Err(BrokerError::new(
            Code::InvalidArgument,
            format!("invalid {kind} id {id:?}"),
        ))
    }
}

impl RestClient {
    /// `{base}/v1/projects/{project}/{collection}[/{id}[:{action}]]`, each
    /// part pushed as one escaped segment.
    fn url(&self, collection: &str, id: Option<&str>, action: Option<&str>) -> Result<Url> {
        let mut url = self.connector.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                BrokerError::new(Code::InvalidArgument, "broker url cannot carry a path")
            })?;
            segments
                .pop_if_empty()
                .extend(["v1", "projects", self.project_id.as_str(), collection]);
            if let Some(id) = id {
                validate_resource_id(collection.trim_end_matches('s'), id)?;
                match action {
                    Some(action) => segments.push(&format!("{id}:{action}")),
                    None => segments.push(id),
                };
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.connector.http.request(method, url);
        match &self.connector.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        response.json::<T>().await.map_err(|err| {
            BrokerError::new(Code::Internal, format!("decode broker response: {err}"))
        })
    }
}

fn transport_error(err: reqwest::Error) -> BrokerError {
    if err.is_timeout() {
        BrokerError::new(Code::DeadlineExceeded, err.to_string())
    } else {
        BrokerError::new(Code::Unavailable, err.to_string())
    }
}

async fn error_from_response(response: Response) -> BrokerError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => {
            let code = envelope
                .error
                .status
                .as_deref()
                .and_then(|value| serde_json::from_value(serde_json::json!(value)).ok())
                .unwrap_or_else(|| Code::from_http_status(status));
            BrokerError::new(code, envelope.error.message)
        }
        Err(_) => BrokerError::new(Code::from_http_status(status), body),
    }
}

fn decode_data(encoded: &str) -> Result<Bytes> {
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|err| BrokerError::new(Code::DataLoss, format!("invalid message data: {err}")))
}

#[async_trait]
impl BrokerClient for RestClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn create_topic(&self, topic_id: &str) -> Result<TopicRef> {
        let topic: TopicResource = self
            .send_json(
                self.request(Method::PUT, self.url("topics", Some(topic_id), None)?)
                    .json(&serde_json::json!({})),
            )
            .await?;
        Ok(TopicRef::from_path(&topic.name)
            .unwrap_or_else(|| TopicRef::new(self.project_id.clone(), topic_id)))
    }

    async fn topic_exists(&self, topic_id: &str) -> Result<bool> {
        match self
            .send(self.request(Method::GET, self.url("topics", Some(topic_id), None)?))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn list_topics(&self) -> Result<Vec<TopicRef>> {
        let mut topics = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut builder = self
                .request(Method::GET, self.url("topics", None, None)?)
                .query(&[("pageSize", LIST_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token)]);
            }
            let page: ListTopicsResponse = self.send_json(builder).await?;
            topics.extend(
                page.topics
                    .iter()
                    .filter_map(|topic| TopicRef::from_path(&topic.name)),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(topics)
    }

    async fn create_subscription(
        &self,
        subscription_id: &str,
        topic_id: &str,
    ) -> Result<SubscriptionRef> {
        validate_resource_id("topic", topic_id)?;
        let topic = TopicRef::new(self.project_id.clone(), topic_id);
        self.send(
            self.request(
                Method::PUT,
                self.url("subscriptions", Some(subscription_id), None)?,
            )
                .json(&SubscriptionBody {
                    topic: topic.path(),
                }),
        )
        .await?;
        Ok(SubscriptionRef {
            project_id: self.project_id.clone(),
            subscription_id: subscription_id.to_string(),
            topic_id: topic_id.to_string(),
        })
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<()> {
        self.send(self.request(
            Method::DELETE,
            self.url("subscriptions", Some(subscription_id), None)?,
        ))
        .await?;
        Ok(())
    }

    async fn publish(&self, topic_id: &str, message: OutboundMessage) -> Result<String> {
        let body = PublishBody {
            messages: vec![WireOutbound {
                data: STANDARD.encode(&message.data),
                attributes: message.attributes,
            }],
        };
        let response: PublishResponse = self
            .send_json(
                self.request(Method::POST, self.url("topics", Some(topic_id), Some("publish"))?)
                    .json(&body),
            )
            .await?;
        response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::new(Code::Internal, "publish returned no message id"))
    }

    async fn pull(
        &self,
        subscription_id: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>> {
        let response: PullResponse = self
            .send_json(
                self.request(
                    Method::POST,
                    self.url("subscriptions", Some(subscription_id), Some("pull"))?,
                )
                    .json(&PullBody {
                        max_messages: max_messages.max(1),
                    }),
            )
            .await?;
        response
            .received_messages
            .into_iter()
            .map(|received| {
                Ok(ReceivedMessage {
                    ack_id: received.ack_id,
                    message_id: received.message.message_id,
                    data: decode_data(&received.message.data)?,
                    publish_time: received.message.publish_time.unwrap_or_else(Utc::now),
                    attributes: received.message.attributes,
                })
            })
            .collect()
    }

    async fn acknowledge(&self, subscription_id: &str, ack_ids: &[String]) -> Result<()> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.send(
            self.request(
                Method::POST,
                self.url("subscriptions", Some(subscription_id), Some("acknowledge"))?,
            )
            .json(&AckBody { ack_ids }),
        )
        .await?;
        Ok(())
    }
}
