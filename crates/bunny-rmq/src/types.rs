//! Wire types of the RabbitMQ management API.
//!
//! Only the fields tbunny reads or writes are modelled; unknown fields are
//! ignored on decode.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Free-form `x-arguments` table.
pub type Arguments = Map<String, Value>;

/// Response of `GET /api/overview`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overview {
    /// Broker version.
    #[serde(default)]
    pub rabbitmq_version: String,
    /// Erlang/OTP version.
    #[serde(default)]
    pub erlang_version: String,
    /// Management plugin version.
    #[serde(default)]
    pub management_version: String,
    /// Cluster name as reported in the overview.
    #[serde(default)]
    pub cluster_name: String,
    /// Node that served the request.
    #[serde(default)]
    pub node: String,
}

/// Response of `GET /api/cluster-name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterName {
    /// Cluster name.
    pub name: String,
}

/// A virtual host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VhostInfo {
    /// Vhost name.
    pub name: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Whether message tracing is enabled.
    #[serde(default)]
    pub tracing: bool,
    /// Total messages across the vhost's queues.
    #[serde(default)]
    pub messages: Option<u64>,
    /// Ready messages.
    #[serde(default)]
    pub messages_ready: Option<u64>,
    /// Unacknowledged messages.
    #[serde(default)]
    pub messages_unacknowledged: Option<u64>,
}

impl VhostInfo {
    /// Creates a vhost record with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Settings for `PUT /api/vhosts/{name}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VhostSettings {
    /// Description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Enable tracing.
    pub tracing: bool,
    /// Default queue type (`classic`, `quorum`, `stream`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_queue_type: Option<String>,
}

/// A queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    /// Queue name.
    pub name: String,
    /// Owning vhost.
    pub vhost: String,
    /// Queue type.
    #[serde(rename = "type", default)]
    pub queue_type: String,
    /// Durable flag.
    #[serde(default)]
    pub durable: bool,
    /// Auto-delete flag.
    #[serde(default)]
    pub auto_delete: bool,
    /// Exclusive flag.
    #[serde(default)]
    pub exclusive: bool,
    /// Queue state (`running`, `idle`, ...).
    #[serde(default)]
    pub state: Option<String>,
    /// Total messages.
    #[serde(default)]
    pub messages: u64,
    /// Ready messages.
    #[serde(default)]
    pub messages_ready: u64,
    /// Unacknowledged messages.
    #[serde(default)]
    pub messages_unacknowledged: u64,
    /// Number of consumers.
    #[serde(default)]
    pub consumers: u64,
    /// Hosting node.
    #[serde(default)]
    pub node: Option<String>,
    /// Declared arguments.
    #[serde(default)]
    pub arguments: Arguments,
}

/// Settings for `PUT /api/queues/{vhost}/{name}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSettings {
    /// Durable flag.
    pub durable: bool,
    /// Auto-delete flag.
    pub auto_delete: bool,
    /// Declared arguments (e.g. `x-queue-type`).
    pub arguments: Arguments,
}

/// An exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeInfo {
    /// Exchange name; empty for the default exchange.
    pub name: String,
    /// Owning vhost.
    pub vhost: String,
    /// Exchange type.
    #[serde(rename = "type", default)]
    pub exchange_type: String,
    /// Durable flag.
    #[serde(default)]
    pub durable: bool,
    /// Auto-delete flag.
    #[serde(default)]
    pub auto_delete: bool,
    /// Internal flag.
    #[serde(default)]
    pub internal: bool,
    /// Declared arguments.
    #[serde(default)]
    pub arguments: Arguments,
}

/// Settings for `PUT /api/exchanges/{vhost}/{name}`.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeSettings {
    /// Exchange type.
    #[serde(rename = "type")]
    pub exchange_type: String,
    /// Durable flag.
    pub durable: bool,
    /// Auto-delete flag.
    pub auto_delete: bool,
    /// Internal flag.
    pub internal: bool,
    /// Declared arguments.
    pub arguments: Arguments,
}

/// A binding between an exchange and a queue or exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingInfo {
    /// Source exchange.
    pub source: String,
    /// Owning vhost.
    pub vhost: String,
    /// Destination name.
    pub destination: String,
    /// `queue` or `exchange`.
    pub destination_type: String,
    /// Routing key.
    #[serde(default)]
    pub routing_key: String,
    /// Key identifying the binding for deletion.
    #[serde(default)]
    pub properties_key: String,
    /// Binding arguments.
    #[serde(default)]
    pub arguments: Arguments,
}

/// Body of a binding declaration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BindingSettings {
    /// Routing key.
    pub routing_key: String,
    /// Binding arguments.
    pub arguments: Arguments,
}

/// A client connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Connection name (used as the key for closing it).
    pub name: String,
    /// Vhost the connection is bound to.
    #[serde(default)]
    pub vhost: String,
    /// Authenticated user.
    #[serde(default)]
    pub user: String,
    /// Connection state.
    #[serde(default)]
    pub state: String,
    /// Protocol string, e.g. `AMQP 0-9-1`.
    #[serde(default)]
    pub protocol: String,
    /// Client host.
    #[serde(default)]
    pub peer_host: Option<String>,
    /// Client port.
    #[serde(default)]
    pub peer_port: Option<u16>,
    /// Open channels.
    #[serde(default)]
    pub channels: u64,
}

/// A user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// User name.
    pub name: String,
    /// Tags such as `administrator`.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
}

/// Body of `PUT /api/users/{name}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserSettings {
    /// Plain text password; omitted to keep the current one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Comma separated tags.
    pub tags: String,
}

/// Permissions of a user in a vhost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    /// User name.
    pub user: String,
    /// Vhost.
    pub vhost: String,
    /// Configure regex.
    pub configure: String,
    /// Write regex.
    pub write: String,
    /// Read regex.
    pub read: String,
}

/// Body of `PUT /api/permissions/{vhost}/{user}`.
#[derive(Debug, Clone, Serialize)]
pub struct Permissions {
    /// Configure regex.
    pub configure: String,
    /// Write regex.
    pub write: String,
    /// Read regex.
    pub read: String,
}

impl Permissions {
    /// Full access (`.*` for everything).
    #[must_use]
    pub fn full() -> Self {
        Self {
            configure: ".*".into(),
            write: ".*".into(),
            read: ".*".into(),
        }
    }
}

/// Acknowledgement mode for fetching messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Requeue after reading.
    AckRequeueTrue,
    /// Remove from the queue.
    AckRequeueFalse,
    /// Reject and requeue.
    RejectRequeueTrue,
    /// Reject without requeue.
    RejectRequeueFalse,
}

/// Body of `POST /api/queues/{vhost}/{name}/get`.
#[derive(Debug, Clone, Serialize)]
pub struct GetMessagesRequest {
    /// Maximum number of messages.
    pub count: u32,
    /// Ack mode.
    #[serde(rename = "ackmode")]
    pub ack_mode: AckMode,
    /// `auto` or `base64`.
    pub encoding: String,
    /// Truncate payloads above this many bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate: Option<u64>,
}

impl GetMessagesRequest {
    /// Peek at up to `count` messages, leaving them in the queue.
    #[must_use]
    pub fn peek(count: u32) -> Self {
        Self {
            count,
            ack_mode: AckMode::AckRequeueTrue,
            encoding: "auto".into(),
            truncate: None,
        }
    }
}

/// A message returned by the get endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedMessage {
    /// Payload (text or base64 depending on `payload_encoding`).
    #[serde(default)]
    pub payload: String,
    /// Original payload size.
    #[serde(default)]
    pub payload_bytes: u64,
    /// `string` or `base64`.
    #[serde(default)]
    pub payload_encoding: String,
    /// Redelivered flag.
    #[serde(default)]
    pub redelivered: bool,
    /// Exchange the message was published to.
    #[serde(default)]
    pub exchange: String,
    /// Routing key.
    #[serde(default)]
    pub routing_key: String,
    /// Messages left in the queue.
    #[serde(default)]
    pub message_count: u64,
    /// AMQP properties.
    #[serde(default)]
    pub properties: Value,
}

/// Body of `POST /api/exchanges/{vhost}/{name}/publish`.
#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    /// Routing key.
    pub routing_key: String,
    /// Payload.
    pub payload: String,
    /// `string` or `base64`.
    pub payload_encoding: String,
    /// AMQP properties.
    pub properties: Map<String, Value>,
}

impl PublishRequest {
    /// Text payload with no properties.
    #[must_use]
    pub fn text(routing_key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
            payload_encoding: "string".into(),
            properties: Map::new(),
        }
    }
}

/// Response of a publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PublishResponse {
    /// Whether the message was routed to at least one queue.
    pub routed: bool,
}

/// Error body returned by the management API.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub reason: String,
}

/// Older brokers send tags as a comma separated string, newer ones as a list.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        List(Vec<String>),
        Text(String),
    }

    Ok(match Tags::deserialize(deserializer)? {
        Tags::List(tags) => tags,
        Tags::Text(text) => text
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overview_ignores_unknown_fields() {
        let json = r#"{
            "rabbitmq_version": "3.13.2",
            "erlang_version": "26.2.5",
            "management_version": "3.13.2",
            "cluster_name": "rabbit@prod",
            "object_totals": {"queues": 3}
        }"#;
        let overview: Overview = serde_json::from_str(json).expect("decode");
        assert_eq!(overview.rabbitmq_version, "3.13.2");
        assert_eq!(overview.cluster_name, "rabbit@prod");
        assert_eq!(overview.node, "");
    }

    #[test]
    fn test_queue_type_renamed() {
        let json = r#"{"name": "orders", "vhost": "/", "type": "quorum", "messages": 7}"#;
        let queue: QueueInfo = serde_json::from_str(json).expect("decode");
        assert_eq!(queue.queue_type, "quorum");
        assert_eq!(queue.messages, 7);
        assert!(queue.arguments.is_empty());
    }

    #[test]
    fn test_user_tags_as_string() {
        let json = r#"{"name": "guest", "tags": "administrator, monitoring"}"#;
        let user: UserInfo = serde_json::from_str(json).expect("decode");
        assert_eq!(user.tags, vec!["administrator", "monitoring"]);
    }

    #[test]
    fn test_user_tags_as_list() {
        let json = r#"{"name": "guest", "tags": ["administrator"]}"#;
        let user: UserInfo = serde_json::from_str(json).expect("decode");
        assert_eq!(user.tags, vec!["administrator"]);
    }

    #[test]
    fn test_get_messages_request_wire_format() {
        let body = serde_json::to_value(GetMessagesRequest::peek(5)).expect("encode");
        assert_eq!(body["ackmode"], "ack_requeue_true");
        assert_eq!(body["count"], 5);
        assert!(body.get("truncate").is_none());
    }

    #[test]
    fn test_exchange_settings_type_field() {
        let settings = ExchangeSettings {
            exchange_type: "topic".into(),
            durable: true,
            auto_delete: false,
            internal: false,
            arguments: Arguments::new(),
        };
        let body = serde_json::to_value(settings).expect("encode");
        assert_eq!(body["type"], "topic");
    }
}
