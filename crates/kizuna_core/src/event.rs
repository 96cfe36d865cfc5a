//! Inbound events and their payloads.
//!
//! Collaborators speak in `(name, json payload)` pairs; `Event::parse` turns
//! them into a closed enum so the state machine can match exhaustively.
//! Payload fields are all optional on the wire and fall back to defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPayload {
    #[serde(alias = "alert_event_id")]
    pub event_id: String,
    #[serde(alias = "region_code")]
    pub region: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: i32,
    pub message: String,
    pub update_seq: Option<u64>,
    pub source: Option<String>,
    /// Preempt an utterance in progress instead of waiting for its boundary.
    #[serde(alias = "allow_mid_chunk")]
    pub allow_mid: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertClearPayload {
    #[serde(alias = "alert_event_id")]
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPayload {
    pub query: Option<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SttPartialPayload {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SttFinalPayload {
    pub text: String,
    pub speaker_id: Option<String>,
    pub speaker_confidence: Option<f32>,
    pub speaker_alias: Option<String>,
    pub has_profile: bool,
    pub speaker_key: Option<String>,
    pub display_name: Option<String>,
    /// Local hour override for greet type decisions.
    pub hour: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchItem {
    pub title: String,
    pub summary: String,
    pub url: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchResultPayload {
    pub ok: bool,
    pub query: Option<String>,
    pub items: Vec<SearchItem>,
    pub error: Option<String>,
    pub from_cache: bool,
}

impl Default for SearchResultPayload {
    fn default() -> Self {
        Self {
            ok: true,
            query: None,
            items: Vec::new(),
            error: None,
            from_cache: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFailedPayload {
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerUnknownPayload {
    pub alias: Option<String>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameAnswerPayload {
    pub alias: Option<String>,
    pub name: Option<String>,
    pub confidence: f32,
}

impl Default for NameAnswerPayload {
    fn default() -> Self {
        Self {
            alias: None,
            name: None,
            confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameConfirmPayload {
    pub alias: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgetNamePayload {
    pub name_or_alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyPayload {
    #[serde(alias = "message_ja")]
    pub message: String,
    pub reason: String,
}

impl Default for EmergencyPayload {
    fn default() -> Self {
        Self {
            message: String::new(),
            reason: "manual".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AlertNew(AlertPayload),
    AlertUpdate(AlertPayload),
    AlertClear(AlertClearPayload),
    StartSearch(SearchPayload),
    CuriositySpike,
    TalkStart,
    TalkEnd,
    SttPartial(SttPartialPayload),
    SttFinal(SttFinalPayload),
    SearchResult(SearchResultPayload),
    SearchFailed(SearchFailedPayload),
    /// Explicit `error` or any `*_fail` event; `source` is the inbound name.
    Error { source: String },
    RecoverDone,
    Tick { dt: f32 },
    SpeakerUnknownDetected(SpeakerUnknownPayload),
    NameAnswer(NameAnswerPayload),
    NameConfirmYes(NameConfirmPayload),
    NameConfirmNo(NameConfirmPayload),
    /// Persistence collaborator finished storing a confirmed name.
    NameSaved(NameConfirmPayload),
    ForgetName(ForgetNamePayload),
    EmergencyTrigger(EmergencyPayload),
    Reset,
}

#[derive(Deserialize)]
#[serde(default)]
struct TickPayload {
    dt: f32,
}

impl Default for TickPayload {
    fn default() -> Self {
        Self { dt: 1.0 }
    }
}

/// Wire envelope: `{"event": "...", "payload": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    pub fn into_event(self) -> Result<Event> {
        Event::parse(&self.event, self.payload)
    }
}

fn payload<T: for<'de> Deserialize<'de>>(name: &str, value: Value) -> Result<T> {
    let value = match value {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(value).map_err(|source| Error::MalformedPayload {
        event: name.to_string(),
        source,
    })
}

impl Event {
    /// Build an event from its inbound name and JSON payload.
    pub fn parse(name: &str, value: Value) -> Result<Event> {
        let event = match name {
            "alert" | "alert_new" => Event::AlertNew(payload(name, value)?),
            "alert_update" => Event::AlertUpdate(payload(name, value)?),
            "alert_clear" => Event::AlertClear(payload(name, value)?),
            "start_search" | "net_query" => Event::StartSearch(payload(name, value)?),
            "curiosity_spike" => Event::CuriositySpike,
            "talk_start" | "vad_start" => Event::TalkStart,
            "talk_end" | "vad_end" => Event::TalkEnd,
            "stt_partial" => Event::SttPartial(payload(name, value)?),
            "stt_final" => Event::SttFinal(payload(name, value)?),
            "search_result" => Event::SearchResult(payload(name, value)?),
            "search_failed" => Event::SearchFailed(payload(name, value)?),
            "recover_done" => Event::RecoverDone,
            "tick" => {
                let tick: TickPayload = payload(name, value)?;
                Event::Tick { dt: tick.dt }
            }
            "speaker_unknown_detected" => Event::SpeakerUnknownDetected(payload(name, value)?),
            "name_answer" => Event::NameAnswer(payload(name, value)?),
            "name_confirm_yes" => Event::NameConfirmYes(payload(name, value)?),
            "name_confirm_no" => Event::NameConfirmNo(payload(name, value)?),
            "name_saved" => Event::NameSaved(payload(name, value)?),
            "forget_name" => Event::ForgetName(payload(name, value)?),
            "emergency_trigger" => Event::EmergencyTrigger(payload(name, value)?),
            "reset" => Event::Reset,
            "error" => Event::Error {
                source: name.to_string(),
            },
            other if other.ends_with("_fail") => Event::Error {
                source: other.to_string(),
            },
            other => return Err(Error::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }

    /// Canonical event name, used for logging.
    pub fn name(&self) -> &str {
        match self {
            Event::AlertNew(_) => "alert_new",
            Event::AlertUpdate(_) => "alert_update",
            Event::AlertClear(_) => "alert_clear",
            Event::StartSearch(_) => "start_search",
            Event::CuriositySpike => "curiosity_spike",
            Event::TalkStart => "talk_start",
            Event::TalkEnd => "talk_end",
            Event::SttPartial(_) => "stt_partial",
            Event::SttFinal(_) => "stt_final",
            Event::SearchResult(_) => "search_result",
            Event::SearchFailed(_) => "search_failed",
            Event::Error { source } => source,
            Event::RecoverDone => "recover_done",
            Event::Tick { .. } => "tick",
            Event::SpeakerUnknownDetected(_) => "speaker_unknown_detected",
            Event::NameAnswer(_) => "name_answer",
            Event::NameConfirmYes(_) => "name_confirm_yes",
            Event::NameConfirmNo(_) => "name_confirm_no",
            Event::NameSaved(_) => "name_saved",
            Event::ForgetName(_) => "forget_name",
            Event::EmergencyTrigger(_) => "emergency_trigger",
            Event::Reset => "reset",
        }
    }

    pub fn is_stt(&self) -> bool {
        matches!(self, Event::SttPartial(_) | Event::SttFinal(_))
    }
}
