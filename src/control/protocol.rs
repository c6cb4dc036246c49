//! Device state protocols
//!
//! Two independent message formats drive the purifier:
//!
//! - **Shadow protocol** (power). A desired-state document is published to
//!   the AWS IoT shadow update topic; the device reconciles asynchronously and
//!   the accepted document is echoed on `.../shadow/update/accepted`.
//! - **Direct command protocol** (fan mode). A `setPort` command is published
//!   to the vendor's `to_ncp` topic.
//!
//! Both are fire-and-forget at application level.
//!
//! The mode property key and its values were obtained from traffic captures
//! of the vendor mobile app. They are undocumented and may change with a
//! vendor firmware or backend update.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::AirlinkError;

/// Property key carrying the fan mode in a `setPort` command.
pub const MODE_PROPERTY: &str = "D0310C";

/// Port addressed by mode commands.
pub const CONTROL_PORT: &str = "Control";

/// Command name of the direct command protocol.
pub const SET_PORT_COMMAND: &str = "setPort";

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// `$aws/things/{thing}/shadow/update`
pub fn shadow_update_topic(thing_name: &str) -> String {
    format!("$aws/things/{thing_name}/shadow/update")
}

/// `$aws/things/{thing}/shadow/update/accepted`
pub fn shadow_accepted_topic(thing_name: &str) -> String {
    format!("{}/accepted", shadow_update_topic(thing_name))
}

/// `{namespace}/{thing}/to_ncp`
pub fn direct_command_topic(namespace: &str, thing_name: &str) -> String {
    format!("{namespace}/{thing_name}/to_ncp")
}

// ---------------------------------------------------------------------------
// FanMode
// ---------------------------------------------------------------------------

/// Fan modes and their wire values. The numbering is not monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanMode {
    /// 0
    Auto,
    /// 17
    Low,
    /// 1
    Medium,
    /// 18
    High,
}

impl FanMode {
    /// All modes in display order.
    pub const ALL: [FanMode; 4] = [FanMode::Auto, FanMode::Low, FanMode::Medium, FanMode::High];

    /// Value written to [`MODE_PROPERTY`].
    pub fn value(self) -> i64 {
        match self {
            FanMode::Auto => 0,
            FanMode::Low => 17,
            FanMode::Medium => 1,
            FanMode::High => 18,
        }
    }

    /// Inverse of [`value`](Self::value).
    pub fn from_value(value: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.value() == value)
    }

    /// Lowercase name accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            FanMode::Auto => "auto",
            FanMode::Low => "low",
            FanMode::Medium => "medium",
            FanMode::High => "high",
        }
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanMode {
    type Err = AirlinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| {
                AirlinkError::Config(format!(
                    "unknown mode '{s}'; expected one of: auto, low, medium, high"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// ControlCommand
// ---------------------------------------------------------------------------

/// A `setPort` command of the direct command protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectCommand {
    /// Correlation id, 8 lowercase hex characters
    pub cid: String,
    /// Issue time, `YYYY-MM-DDTHH:MM:SSZ`
    pub time: String,
    /// Command name (`setPort`)
    pub command_name: String,
    /// Addressed port (`Control`)
    pub target: String,
    /// Property writes
    pub properties: BTreeMap<String, Value>,
}

/// A message to the device on one of the two protocols.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// Shadow protocol desired state
    ShadowDesiredState {
        /// Desired power state
        power_on: bool,
    },
    /// Direct command protocol message
    Direct(DirectCommand),
}

impl ControlCommand {
    /// Shadow command switching the device on or off.
    pub fn power(power_on: bool) -> Self {
        ControlCommand::ShadowDesiredState { power_on }
    }

    /// Direct command selecting `mode`, stamped with `now`.
    pub fn set_mode(mode: FanMode, now: DateTime<Utc>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(MODE_PROPERTY.to_string(), Value::from(mode.value()));
        ControlCommand::Direct(DirectCommand {
            cid: new_correlation_id(),
            time: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            command_name: SET_PORT_COMMAND.to_string(),
            target: CONTROL_PORT.to_string(),
            properties,
        })
    }

    /// Topic this command is published to.
    pub fn topic(&self, thing_name: &str, namespace: &str) -> String {
        match self {
            ControlCommand::ShadowDesiredState { .. } => shadow_update_topic(thing_name),
            ControlCommand::Direct(_) => direct_command_topic(namespace, thing_name),
        }
    }

    /// JSON document sent on the wire.
    pub fn payload(&self) -> Value {
        match self {
            ControlCommand::ShadowDesiredState { power_on } => {
                json!({ "state": { "desired": { "powerOn": power_on } } })
            }
            ControlCommand::Direct(cmd) => json!({
                "cid": cmd.cid,
                "time": cmd.time,
                "type": "command",
                "cn": cmd.command_name,
                "ct": "mobile",
                "data": {
                    "portName": cmd.target,
                    "properties": cmd.properties,
                },
            }),
        }
    }
}

fn new_correlation_id() -> String {
    let mut cid = uuid::Uuid::new_v4().simple().to_string();
    cid.truncate(8);
    cid
}

/// Reads `state.reported.powerOn` from a shadow document.
///
/// For collaborators that mirror the device state from accepted-topic
/// echoes; the session itself forwards payloads without parsing them.
pub fn reported_power(payload: &[u8]) -> Option<bool> {
    let doc: Value = serde_json::from_slice(payload).ok()?;
    doc.get("state")?.get("reported")?.get("powerOn")?.as_bool()
}
