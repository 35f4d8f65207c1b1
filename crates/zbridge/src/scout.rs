// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scouting for routers and peers.

use std::fmt;

use log::warn;
use parking_lot::Mutex;
use serde::Deserialize;

/// Which node roles to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScoutTarget {
    Router,
    Peer,
    #[default]
    RouterOrPeer,
}

impl ScoutTarget {
    /// Value of the engine's `what` argument.
    pub const fn as_str(self) -> &'static str {
        match self {
            ScoutTarget::Router => "router",
            ScoutTarget::Peer => "peer",
            ScoutTarget::RouterOrPeer => "router|peer",
        }
    }
}

/// Role of a discovered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhatAmI {
    Router,
    Peer,
    Client,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for WhatAmI {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WhatAmI::Router => "router",
            WhatAmI::Peer => "peer",
            WhatAmI::Client => "client",
            WhatAmI::Unknown => "unknown",
        })
    }
}

/// One discovered node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Hello {
    pub whatami: WhatAmI,
    pub zid: String,
}

#[derive(Deserialize)]
struct HelloEvent {
    event: String,
    #[serde(flatten)]
    hello: Hello,
}

/// Scout callback context; lives on the stack of the blocking scout call.
#[derive(Default)]
pub(crate) struct ScoutCollector {
    hellos: Mutex<Vec<Hello>>,
}

impl ScoutCollector {
    pub(crate) fn push_json(&self, json: &str) {
        match serde_json::from_str::<HelloEvent>(json) {
            Ok(ev) if ev.event == "peer_discovered" => self.hellos.lock().push(ev.hello),
            Ok(ev) => warn!("unexpected scout event '{}' skipped", ev.event),
            Err(e) => warn!("malformed scout hello skipped: {}", e),
        }
    }

    pub(crate) fn into_hellos(self) -> Vec<Hello> {
        self.hellos.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_engine_hello_json() {
        let collector = ScoutCollector::default();
        collector.push_json(
            r#"{"event":"peer_discovered","whatami":"router","zid":"0a0b0c0d-0e0f-1011-1213-141516171819"}"#,
        );
        collector.push_json(r#"{"event":"peer_discovered","whatami":"weird","zid":"x"}"#);
        collector.push_json("not json");
        collector.push_json(r#"{"event":"gone","whatami":"peer","zid":"y"}"#);

        let hellos = collector.into_hellos();
        assert_eq!(hellos.len(), 2);
        assert_eq!(hellos[0].whatami, WhatAmI::Router);
        assert_eq!(hellos[0].zid, "0a0b0c0d-0e0f-1011-1213-141516171819");
        assert_eq!(hellos[1].whatami, WhatAmI::Unknown);
    }

    #[test]
    fn target_strings() {
        assert_eq!(ScoutTarget::default().as_str(), "router|peer");
        assert_eq!(ScoutTarget::Router.as_str(), "router");
    }
}
