// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoded events delivered to managed consumers.
//!
//! Every field is an owned copy made inside the trampoline; none of these
//! types can reference engine memory.

use crate::buffer::Payload;
use crate::options::{CongestionControl, Encoding, Priority, SampleKind};

/// A publication received by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub key: String,
    pub payload: Payload,
    pub kind: SampleKind,
    pub encoding: Encoding,
    pub attachment: Option<Payload>,
    pub priority: Priority,
    pub congestion_control: CongestionControl,
    /// Engine timestamp; 0 when the engine did not stamp the sample.
    pub timestamp: u64,
}

impl Sample {
    pub fn is_delete(&self) -> bool {
        self.kind == SampleKind::Delete
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp != 0
    }
}

/// One reply to a `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub key: String,
    pub payload: Payload,
    pub kind: SampleKind,
    pub encoding: Encoding,
    pub attachment: Option<Payload>,
}

/// Liveliness transition (or current state, for liveliness queries).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LivelinessEvent {
    pub key: String,
    pub alive: bool,
}
