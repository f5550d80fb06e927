use thiserror::Error;

use crate::runtime::{
    CorrelationId, PayloadValue, RawEvent, Stream, EVENT_ALLOCATION_TICK, EVENT_REQUEST_START,
    EVENT_REQUEST_STOP,
};

/// The three events the engine understands, decoded once from a
/// [`RawEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent<'a> {
    RequestStart {
        id: CorrelationId,
        request_id: &'a str,
        verb: &'a str,
        path: &'a str,
    },
    RequestStop {
        id: CorrelationId,
    },
    AllocationTick {
        id: CorrelationId,
        type_name: &'a str,
        bytes: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("event {event_id} on {stream:?} has no payload field {index} ({field})")]
    MissingField {
        stream: Stream,
        event_id: u16,
        index: usize,
        field: &'static str,
    },
    #[error("event {event_id} on {stream:?}: payload field {index} ({field}) is not {expected}")]
    WrongType {
        stream: Stream,
        event_id: u16,
        index: usize,
        field: &'static str,
        expected: &'static str,
    },
}

impl<'a> TraceEvent<'a> {
    /// `Ok(None)` for events on a known stream that the engine does not
    /// care about.
    pub fn decode(event: &RawEvent<'a>) -> Result<Option<Self>, DecodeError> {
        let id = event.correlation_id;
        let decoded = match (event.stream, event.event_id) {
            (Stream::RequestLifecycle, EVENT_REQUEST_START) => Self::RequestStart {
                id,
                request_id: str_field(event, 0, "request_id")?,
                verb: str_field(event, 1, "verb")?,
                path: str_field(event, 2, "path")?,
            },
            (Stream::RequestLifecycle, EVENT_REQUEST_STOP) => Self::RequestStop { id },
            (Stream::Allocation, EVENT_ALLOCATION_TICK) => Self::AllocationTick {
                id,
                bytes: u64_field(event, 0, "bytes")?,
                type_name: str_field(event, 1, "type_name")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn correlation_id(&self) -> CorrelationId {
        match *self {
            Self::RequestStart { id, .. }
            | Self::RequestStop { id }
            | Self::AllocationTick { id, .. } => id,
        }
    }
}

fn field<'a>(
    event: &RawEvent<'a>,
    index: usize,
    name: &'static str,
) -> Result<PayloadValue<'a>, DecodeError> {
    event.field(index).ok_or(DecodeError::MissingField {
        stream: event.stream,
        event_id: event.event_id,
        index,
        field: name,
    })
}

fn wrong_type(
    event: &RawEvent<'_>,
    index: usize,
    name: &'static str,
    expected: &'static str,
) -> DecodeError {
    DecodeError::WrongType {
        stream: event.stream,
        event_id: event.event_id,
        index,
        field: name,
        expected,
    }
}

fn str_field<'a>(
    event: &RawEvent<'a>,
    index: usize,
    name: &'static str,
) -> Result<&'a str, DecodeError> {
    match field(event, index, name)? {
        PayloadValue::Str(value) => Ok(value),
        PayloadValue::U64(_) => Err(wrong_type(event, index, name, "a string")),
    }
}

fn u64_field(event: &RawEvent<'_>, index: usize, name: &'static str) -> Result<u64, DecodeError> {
    match field(event, index, name)? {
        PayloadValue::U64(value) => Ok(value),
        PayloadValue::Str(_) => Err(wrong_type(event, index, name, "an integer")),
    }
}
