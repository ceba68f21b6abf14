//! Messages exchanged between the job dispatcher and the map worker
//!
//! Every message is one JSON object on its own line, tagged by `type`. Image
//! bytes travel base64-encoded. Both sides decode and check direction on
//! receipt.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::raster::RenderMode;
use crate::seeds::MapSeed;

/// Correlation token for one job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Fresh random 128-bit id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Dispatcher → worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkMessage {
    pub job_id: JobId,
    pub seed: MapSeed,
    pub color: bool,
}

impl WorkMessage {
    pub fn mode(&self) -> RenderMode {
        RenderMode::from_color_flag(self.color)
    }
}

/// Worker → dispatcher, success
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub job_id: JobId,
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
}

/// Worker → dispatcher, generation failed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedMessage {
    pub job_id: JobId,
    pub reason: String,
}

/// Every message that can cross the worker channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Work(WorkMessage),
    Result(ResultMessage),
    Failed(FailedMessage),
}

impl Envelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Work(_) => "work",
            Envelope::Result(_) => "result",
            Envelope::Failed(_) => "failed",
        }
    }

    /// Serialize to a single line (no trailing newline).
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame.trim_end()).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// What the dispatcher accepts from a worker
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerReply {
    Result(ResultMessage),
    Failed(FailedMessage),
}

impl WorkerReply {
    pub fn job_id(&self) -> JobId {
        match self {
            WorkerReply::Result(m) => m.job_id,
            WorkerReply::Failed(m) => m.job_id,
        }
    }

    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        match Envelope::from_frame(frame)? {
            Envelope::Result(m) => Ok(WorkerReply::Result(m)),
            Envelope::Failed(m) => Ok(WorkerReply::Failed(m)),
            other => Err(ProtocolError::UnexpectedKind(other.kind())),
        }
    }

    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        match self {
            WorkerReply::Result(m) => Envelope::Result(m.clone()).to_frame(),
            WorkerReply::Failed(m) => Envelope::Failed(m.clone()).to_frame(),
        }
    }
}

impl WorkMessage {
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        match Envelope::from_frame(frame)? {
            Envelope::Work(m) => Ok(m),
            other => Err(ProtocolError::UnexpectedKind(other.kind())),
        }
    }

    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        Envelope::Work(self.clone()).to_frame()
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
