//! The unit of progress every operation streams back: a fraction of the
//! work done since the previous item, plus an optional payload.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialResult<R> {
    pub delta_done: f64,
    pub payload: Option<R>,
}

impl<R> PartialResult<R> {
    pub fn new(delta_done: f64, payload: impl Into<Option<R>>) -> Self {
        Self {
            delta_done,
            payload: payload.into(),
        }
    }

    /// A single item carrying the whole operation's progress and its
    /// final payload, for operations that do no incremental reporting.
    pub fn done(payload: R) -> Self {
        Self::new(1.0, Some(payload))
    }

    pub fn map_payload<U>(self, f: impl FnOnce(R) -> U) -> PartialResult<U> {
        PartialResult {
            delta_done: self.delta_done,
            payload: self.payload.map(f),
        }
    }
}
