pub mod kafka;

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::errors::SourceError;

/// A message received from source regardless of whether it's Kafka, Kinesis Stream, Pulsar, etc.
#[derive(Debug, Clone)]
pub struct SourceMessage {
    /// raw payload of message e.g. kafka message body
    pub payload: Vec<u8>,
    pub key: Option<Vec<u8>>,
    /// Topic or stream name of this message
    pub topic: String,
    pub position: Position,
    /// Optional key/value headers for metadata.
    pub headers: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct MessageBatch {
    pub messages: Vec<SourceMessage>,
}

impl MessageBatch {
    pub fn new(messages: Vec<SourceMessage>) -> Self {
        Self { messages }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Where a message sits in the source: partition (or shard) and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub partition: i32,
    pub offset: i64,
}

impl Position {
    pub fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }
}

/// Highest processed offset per partition.
///
/// A cursor handed to [`Source::commit`] means every message at or below
/// these offsets has been durably written, so the source may resume after
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetCursor {
    offsets: BTreeMap<i32, i64>,
}

impl OffsetCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the partition forward to `position`; never moves it back.
    pub fn advance(&mut self, position: Position) {
        self.offsets
            .entry(position.partition)
            .and_modify(|offset| *offset = (*offset).max(position.offset))
            .or_insert(position.offset);
    }

    pub fn merge(&mut self, other: &OffsetCursor) {
        for (&partition, &offset) in &other.offsets {
            self.advance(Position::new(partition, offset));
        }
    }

    pub fn offset(&self, partition: i32) -> Option<i64> {
        self.offsets.get(&partition).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Position> + '_ {
        self.offsets
            .iter()
            .map(|(&partition, &offset)| Position::new(partition, offset))
    }
}

#[allow(async_fn_in_trait)]
pub trait Source {
    /// Receives a batch of messages from the source.
    ///
    /// This method should block until messages are available or a timeout occurs.
    /// An empty `MessageBatch` indicates that the poll timed out without new messages.
    async fn next_batch(&self) -> Result<MessageBatch, SourceError>;

    /// Commits progress up to and including the cursor's offsets, never beyond.
    async fn commit(&self, cursor: &OffsetCursor) -> Result<(), SourceError>;

    /// Closes the connection to the source and cleans up resources.
    /// This should be called during graceful shutdown.
    async fn shutdown(&self) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_only_moves_forward() {
        let mut cursor = OffsetCursor::new();
        cursor.advance(Position::new(0, 10));
        cursor.advance(Position::new(0, 4));
        cursor.advance(Position::new(1, 2));

        assert_eq!(cursor.offset(0), Some(10));
        assert_eq!(cursor.offset(1), Some(2));
        assert_eq!(cursor.offset(2), None);
    }

    #[test]
    fn test_cursor_merge_keeps_highest() {
        let mut a = OffsetCursor::new();
        a.advance(Position::new(0, 5));
        a.advance(Position::new(1, 9));
        let mut b = OffsetCursor::new();
        b.advance(Position::new(0, 7));
        b.advance(Position::new(2, 1));

        a.merge(&b);

        let positions: Vec<Position> = a.iter().collect();
        assert_eq!(
            positions,
            vec![Position::new(0, 7), Position::new(1, 9), Position::new(2, 1)]
        );
    }
}
