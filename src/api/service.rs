use crate::core::connection::ConnectionManager;
use crate::domain::connection::{ConnectionConfig, ConnectionKey};
use crate::domain::error::{SerialMonError, SerialMonResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Commands accepted from a front-end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum DeviceRequest {
    #[serde(rename = "device.connect")]
    Connect {
        config: ConnectionConfig,
        #[serde(default)]
        retry: bool,
    },
    #[serde(rename = "device.disconnect")]
    Disconnect { key: ConnectionKey },
    #[serde(rename = "device.write")]
    Write { key: ConnectionKey, text: String },
    #[serde(rename = "device.list")]
    List,
    #[serde(rename = "device.reconnect")]
    Reconnect { key: ConnectionKey },
    #[serde(rename = "device.status")]
    Status,
}

/// Request with an optional correlation id echoed back in the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub request: DeviceRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&SerialMonError> for ErrorBody {
    fn from(err: &SerialMonError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl DeviceResponse {
    pub fn success(id: Option<u64>, result: Value) -> Self {
        Self { id, ok: true, result: Some(result), error: None }
    }

    pub fn failure(id: Option<u64>, err: &SerialMonError) -> Self {
        Self { id, ok: false, result: None, error: Some(err.into()) }
    }
}

/// Executes device commands against a connection manager
#[derive(Clone)]
pub struct DeviceService {
    manager: ConnectionManager,
}

impl DeviceService {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn handle(&self, request: DeviceRequest) -> SerialMonResult<Value> {
        match request {
            DeviceRequest::Connect { config, retry } => {
                self.manager.connect(config, retry).await?;
                Ok(Value::Bool(true))
            }
            DeviceRequest::Disconnect { key } => {
                self.manager.disconnect(&key).await?;
                Ok(Value::Bool(true))
            }
            DeviceRequest::Write { key, text } => {
                self.manager.write(&key, &text).await?;
                Ok(Value::Bool(true))
            }
            DeviceRequest::List => {
                let devices = self.manager.list_devices().await?;
                to_value(&devices)
            }
            DeviceRequest::Reconnect { key } => {
                self.manager.reconnect(&key).await?;
                Ok(Value::Bool(true))
            }
            DeviceRequest::Status => {
                let statuses = self.manager.statuses().await;
                to_value(&statuses)
            }
        }
    }

    pub async fn respond(&self, envelope: RequestEnvelope) -> DeviceResponse {
        debug!("Handling {:?}", envelope.request);
        match self.handle(envelope.request).await {
            Ok(result) => DeviceResponse::success(envelope.id, result),
            Err(e) => DeviceResponse::failure(envelope.id, &e),
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> SerialMonResult<Value> {
    serde_json::to_value(value).map_err(|e| SerialMonError::Output(e.to_string()))
}
