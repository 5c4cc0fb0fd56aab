//! Frame model and the wire codec for the graphql-ws protocol.
//!
//! Every frame on the wire is a JSON object `{"id"?, "type", "payload"?}`.
//! Decoding is structural only: an unrecognised `type` decodes to
//! [`FrameKind::Unknown`] and is rejected later by the connection, never here.
//! Encoding omits absent `id` and `payload` members.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;

/// The `type` member of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Client -> Server: open the protocol session.
    ConnectionInit,
    /// Server -> Client: session accepted.
    ConnectionAck,
    /// Server -> Client: session rejected.
    ConnectionError,
    /// Server -> Client: keep-alive.
    KeepAlive,
    /// Client -> Server: end the protocol session.
    ConnectionTerminate,
    /// Client -> Server: start an operation.
    Start,
    /// Client -> Server: stop an operation.
    Stop,
    /// Server -> Client: operation result.
    Data,
    /// Server -> Client: operation error.
    Error,
    /// Server -> Client: operation finished.
    Complete,
    /// A `type` this client does not understand.
    Unknown(String),
}

impl FrameKind {
    /// The wire name of this frame type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::ConnectionError => "connection_error",
            Self::KeepAlive => "ka",
            Self::ConnectionTerminate => "connection_terminate",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Unknown(name) => name,
        }
    }

    /// Parse a wire name. Never fails.
    pub fn parse(name: &str) -> Self {
        match name {
            "connection_init" => Self::ConnectionInit,
            "connection_ack" => Self::ConnectionAck,
            "connection_error" => Self::ConnectionError,
            "ka" => Self::KeepAlive,
            "connection_terminate" => Self::ConnectionTerminate,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "data" => Self::Data,
            "error" => Self::Error,
            "complete" => Self::Complete,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether the frame addresses a single operation id.
    pub fn is_operation(&self) -> bool {
        matches!(
            self,
            Self::Start | Self::Stop | Self::Data | Self::Error | Self::Complete
        )
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `payload` of a `start` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    /// The GraphQL document, passed through unmodified.
    pub query: String,

    /// Optional variables for the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    /// Optional operation name (for documents with multiple operations).
    #[serde(
        default,
        rename = "operationName",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
}

impl QueryPayload {
    /// Create a payload carrying only the query text.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let payload = QueryPayload::new("subscription OnCount($step: Int!) { count(step: $step) }")
    ///     .variable("step", 2)
    ///     .operation_name("OnCount");
    /// ```
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    /// Set a single variable value.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let variables = self
            .variables
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = variables
            && let Ok(value) = serde_json::to_value(value)
        {
            map.insert(name.into(), value);
        }
        self
    }

    /// Replace all variables with a serializable value.
    pub fn variables(mut self, variables: impl Serialize) -> Self {
        self.variables = serde_json::to_value(variables).ok();
        self
    }

    /// Set the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

impl From<&str> for QueryPayload {
    fn from(query: &str) -> Self {
        Self::new(query)
    }
}

impl From<String> for QueryPayload {
    fn from(query: String) -> Self {
        Self::new(query)
    }
}

/// A location in a GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

/// A segment in an error path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// A list index.
    Index(usize),
}

/// A GraphQL execution error carried inside a `data` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// The error message.
    pub message: String,

    /// Locations in the document where the error occurred.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub locations: Vec<Location>,

    /// Path to the field that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Additional error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (at ")?;
            for (i, segment) in path.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                match segment {
                    PathSegment::Field(name) => write!(f, "{name}")?,
                    PathSegment::Index(idx) => write!(f, "[{idx}]")?,
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// The `payload` of a `data` frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultPayload {
    /// The operation result.
    #[serde(default)]
    pub data: Option<Value>,

    /// Execution errors, if any.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub errors: Vec<ServerError>,
}

/// Servers send `null` for absent lists as often as they omit them.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The `payload` of an `error` or `connection_error` frame, reduced to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Human-readable error message.
    pub message: String,
}

impl ErrorDetail {
    /// Extract a message from whatever shape the server chose.
    ///
    /// Accepts a bare string, `{"message": ..}`, `{"data": ..}` or a list of
    /// those; anything else is rendered as JSON text.
    pub fn from_value(value: &Value) -> Self {
        let message = match value {
            Value::String(s) => s.clone(),
            Value::Object(map) => match (map.get("message"), map.get("data")) {
                (Some(Value::String(msg)), _) => msg.clone(),
                (_, Some(Value::String(data))) => data.clone(),
                (_, Some(data)) if !data.is_null() => data.to_string(),
                _ => value.to_string(),
            },
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| Self::from_value(item).message)
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        };
        Self { message }
    }
}

/// A decoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Outbound `start` payload.
    Query(QueryPayload),
    /// Inbound `data` payload.
    Result(ResultPayload),
    /// Inbound `error` / `connection_error` payload.
    Error(ErrorDetail),
    /// Any other payload, kept verbatim (e.g. a `connection_init` payload).
    Other(Value),
}

impl Payload {
    fn to_value(&self) -> Result<Value> {
        Ok(match self {
            Self::Query(query) => serde_json::to_value(query)?,
            Self::Result(result) => serde_json::to_value(result)?,
            Self::Error(detail) => serde_json::json!({ "message": detail.message }),
            Self::Other(value) => value.clone(),
        })
    }

    fn from_wire(kind: &FrameKind, value: Value) -> Self {
        match kind {
            FrameKind::Data => match serde_json::from_value::<ResultPayload>(value.clone()) {
                Ok(result) => Self::Result(result),
                Err(_) => Self::Other(value),
            },
            FrameKind::Error | FrameKind::ConnectionError => {
                Self::Error(ErrorDetail::from_value(&value))
            }
            FrameKind::Start => match serde_json::from_value::<QueryPayload>(value.clone()) {
                Ok(query) => Self::Query(query),
                Err(_) => Self::Other(value),
            },
            _ => Self::Other(value),
        }
    }
}

/// The JSON shape of a frame.
///
/// `id` and `type` stay untyped so that odd values still decode.
#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl WireFrame {
    fn kind(&self) -> FrameKind {
        match &self.kind {
            Some(Value::String(name)) => FrameKind::parse(name),
            Some(other) => FrameKind::Unknown(other.to_string()),
            None => FrameKind::Unknown(String::new()),
        }
    }

    fn id(&self) -> Option<String> {
        match &self.id {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The frame type.
    pub kind: FrameKind,
    /// The operation id, present on operation frames.
    pub id: Option<String>,
    /// The payload, if any.
    pub payload: Option<Payload>,
}

impl Frame {
    fn new(kind: FrameKind, id: Option<String>, payload: Option<Payload>) -> Self {
        Self { kind, id, payload }
    }

    /// `connection_init`, optionally carrying connection parameters.
    pub fn connection_init(params: Option<Value>) -> Self {
        Self::new(FrameKind::ConnectionInit, None, params.map(Payload::Other))
    }

    /// `connection_terminate`.
    pub fn connection_terminate() -> Self {
        Self::new(FrameKind::ConnectionTerminate, None, None)
    }

    /// `start` for the given operation id.
    pub fn start(id: impl Into<String>, query: QueryPayload) -> Self {
        Self::new(FrameKind::Start, Some(id.into()), Some(Payload::Query(query)))
    }

    /// `stop` for the given operation id.
    pub fn stop(id: impl Into<String>) -> Self {
        Self::new(FrameKind::Stop, Some(id.into()), None)
    }

    /// Serialize to wire JSON.
    pub fn encode(&self) -> Result<String> {
        let wire = WireFrame {
            id: self.id.clone().map(Value::String),
            kind: Some(Value::String(self.kind.as_str().to_string())),
            payload: self.payload.as_ref().map(Payload::to_value).transpose()?,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Parse wire JSON.
    ///
    /// Fails only when the text is not a JSON object; unknown frame types and
    /// unexpected payload shapes still decode.
    pub fn decode(text: &str) -> Result<Self> {
        let wire: WireFrame = serde_json::from_str(text)?;
        let kind = wire.kind();
        let id = wire.id();
        let payload = wire.payload.map(|value| Payload::from_wire(&kind, value));
        Ok(Self::new(kind, id, payload))
    }
}
