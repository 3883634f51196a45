use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::TopicMessage;

/// Start offset used for live-tail requests: "whatever is written from now on".
pub const LIVE_TAIL_START_OFFSET: i64 = -1;

pub const PHASE_GET_PARTITIONS: &str = "Get Partitions";
pub const PHASE_GET_WATERMARKS: &str = "Get Watermarks and calculate consuming requests";
pub const PHASE_CONSUMING: &str = "Consuming messages";

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid start offset {0}: expected -1 (recent), -2 (oldest), -3 (newest) or an offset >= 0")]
pub struct InvalidStartOffset(pub i64);

/// Where in each partition a request starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum StartOffset {
    /// The most recent `messageCount` messages, read backwards from the high watermark.
    Recent,
    /// From the low watermark onwards.
    Oldest,
    /// Live tail: only messages produced after the request started.
    Newest,
    /// From an explicit offset, clamped to the low watermark.
    Absolute(i64),
}

impl TryFrom<i64> for StartOffset {
    type Error = InvalidStartOffset;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(StartOffset::Recent),
            -2 => Ok(StartOffset::Oldest),
            -3 => Ok(StartOffset::Newest),
            offset if offset >= 0 => Ok(StartOffset::Absolute(offset)),
            other => Err(InvalidStartOffset(other)),
        }
    }
}

impl From<StartOffset> for i64 {
    fn from(value: StartOffset) -> Self {
        match value {
            StartOffset::Recent => -1,
            StartOffset::Oldest => -2,
            StartOffset::Newest => -3,
            StartOffset::Absolute(offset) => offset,
        }
    }
}

/// Which partitions of the topic a request covers. Encoded as `-1` for all
/// partitions, or the partition id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum PartitionSelection {
    All,
    Single(i32),
}

impl From<i32> for PartitionSelection {
    fn from(value: i32) -> Self {
        if value < 0 {
            PartitionSelection::All
        } else {
            PartitionSelection::Single(value)
        }
    }
}

impl From<PartitionSelection> for i32 {
    fn from(value: PartitionSelection) -> Self {
        match value {
            PartitionSelection::All => -1,
            PartitionSelection::Single(id) => id,
        }
    }
}

/// Offset bounds of a single partition at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    pub partition_id: i32,
    /// Oldest offset still retained.
    pub low: i64,
    /// One past the newest written offset.
    pub high: i64,
}

impl Watermark {
    pub fn new(partition_id: i32, low: i64, high: i64) -> Self {
        Self {
            partition_id,
            low,
            high,
        }
    }

    pub fn message_count(&self) -> i64 {
        (self.high - self.low).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }
}

/// Fetch plan for one partition, produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionConsumeRequest {
    pub partition_id: i32,
    pub low_watermark: i64,
    pub high_watermark: i64,
    /// First offset to read. [`LIVE_TAIL_START_OFFSET`] for live tail.
    pub start_offset: i64,
    /// Last offset to read, inclusive. `i64::MAX` for live tail.
    pub end_offset: i64,
    pub max_message_count: i64,
    pub is_drained: bool,
}

impl PartitionConsumeRequest {
    pub fn is_live_tail(&self) -> bool {
        self.start_offset == LIVE_TAIL_START_OFFSET && self.end_offset == i64::MAX
    }

    /// Number of offsets between start and end, inclusive. Zero when the
    /// range is empty.
    pub fn available_messages(&self) -> i64 {
        if self.is_live_tail() {
            return i64::MAX;
        }
        (self.end_offset - self.start_offset + 1).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessageRequest {
    #[serde(default)]
    pub topic_name: String,
    #[serde(default = "all_partitions", alias = "partitionID")]
    pub partition_id: PartitionSelection,
    #[serde(alias = "startOffsetMode")]
    pub start_offset: StartOffset,
    pub message_count: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<String>,
}

fn all_partitions() -> PartitionSelection {
    PartitionSelection::All
}

impl ListMessageRequest {
    /// The filter, ignoring expressions that are blank.
    pub fn filter(&self) -> Option<&str> {
        self.filter_expression
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }
}

/// Events sent to the remote observer, one JSON object per frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum StreamEvent {
    Phase {
        phase: String,
    },
    Message {
        message: Box<TopicMessage>,
    },
    ProgressUpdate {
        messages_consumed: i64,
        bytes_consumed: i64,
    },
    PartitionError {
        partition_id: i32,
        message: String,
    },
    Done {
        elapsed_ms: f64,
        is_cancelled: bool,
        messages_consumed: i64,
        bytes_consumed: i64,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
