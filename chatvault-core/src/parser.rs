//! Session data parser
//!
//! Turns the editor's untyped session JSON into [`ParsedSession`] records.
//!
//! The editor owns this data and its shape drifts between releases, so the
//! parser never fails hard on content: every problem becomes either a
//! warning, a rejected message or a rejected session, and the outcome is a
//! [`ParseReport`]. Only "no valid session at all" makes the report a failure.
//!
//! ## Rules
//!
//! - Input is an array of sessions; a single object is wrapped with a warning.
//! - Session id comes from `id` or `sessionId`. Without one the session is
//!   rejected when `require_session_id` is set, otherwise an id of the form
//!   `session-<epoch ms>-<index>` is synthesized. That id embeds wall-clock
//!   time and is the only non-deterministic part of the output.
//! - `messages` must be an array. Each message needs `role` equal to `user`
//!   or `assistant` and a string `content`.
//! - Strict mode rejects a session at its first invalid message; lenient mode
//!   skips the message with a warning.
//! - Timestamps are epoch milliseconds or date strings. Unreadable ones are
//!   dropped with a warning; implausible ones (future, older than a year) only
//!   warn.

use crate::types::{ParsedMessage, ParsedSession, Role};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

/// Naive formats tried after RFC 3339, interpreted as UTC
const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

/// Largest clock skew tolerated before a timestamp counts as future-dated
const FUTURE_TOLERANCE_MINUTES: i64 = 5;

/// Age after which a timestamp is flagged as stale
const MAX_AGE_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParserConfig {
    /// Reject a session at its first invalid message
    pub strict: bool,
    /// Reject sessions without `id`/`sessionId` instead of synthesizing one
    pub require_session_id: bool,
    /// Keep sessions that end up with no valid messages
    pub allow_empty_sessions: bool,
    /// Warn about future-dated or very old timestamps
    pub validate_timestamps: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            strict: false,
            require_session_id: false,
            allow_empty_sessions: false,
            validate_timestamps: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub sessions_seen: usize,
    pub sessions_valid: usize,
    pub sessions_rejected: usize,
    pub messages_seen: usize,
    pub messages_valid: usize,
    pub messages_rejected: usize,
    pub duration: Duration,
}

/// Outcome of one parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    /// At least one session survived validation
    pub success: bool,
    pub sessions: Vec<ParsedSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub stats: ParseStats,
}

/// Validating parser for raw session JSON.
#[derive(Debug, Clone, Default)]
pub struct SessionParser {
    config: ParserConfig,
}

impl SessionParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse JSON text. Malformed JSON yields a failed report.
    pub fn parse_str(&self, raw: &str) -> ParseReport {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.parse(&value),
            Err(e) => ParseReport {
                success: false,
                sessions: Vec::new(),
                error: Some(format!("malformed JSON: {}", e)),
                warnings: Vec::new(),
                stats: ParseStats::default(),
            },
        }
    }

    /// Parse an already decoded value.
    pub fn parse(&self, raw: &Value) -> ParseReport {
        let mut run = ParseRun::new(&self.config);

        let entries: Vec<&Value> = match raw {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => {
                run.warn("input is a single session object; treating it as a one-element list");
                vec![raw]
            }
            other => {
                return run.finish(
                    Vec::new(),
                    Some(format!(
                        "expected an array of sessions, got {}",
                        value_kind(other)
                    )),
                );
            }
        };

        let mut sessions = Vec::new();
        let mut last_rejection = None;
        for (index, entry) in entries.into_iter().enumerate() {
            run.stats.sessions_seen += 1;
            match run.parse_session(index, entry) {
                Ok(session) => {
                    run.stats.sessions_valid += 1;
                    sessions.push(session);
                }
                Err(reason) => {
                    run.stats.sessions_rejected += 1;
                    run.warn(format!("session {} rejected: {}", index, reason));
                    last_rejection = Some(reason);
                }
            }
        }

        let error = if sessions.is_empty() {
            Some(match last_rejection {
                Some(reason) => format!("no valid sessions found (last rejection: {})", reason),
                None => "no valid sessions found".to_string(),
            })
        } else {
            None
        };

        tracing::debug!(
            seen = run.stats.sessions_seen,
            valid = run.stats.sessions_valid,
            rejected = run.stats.sessions_rejected,
            "Parsed sessions"
        );
        run.finish(sessions, error)
    }
}

/// Mutable state for a single `parse` call.
struct ParseRun<'a> {
    config: &'a ParserConfig,
    started: Instant,
    now: DateTime<Utc>,
    warnings: Vec<String>,
    stats: ParseStats,
}

impl<'a> ParseRun<'a> {
    fn new(config: &'a ParserConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            now: Utc::now(),
            warnings: Vec::new(),
            stats: ParseStats::default(),
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(warning = %message, "Session data warning");
        self.warnings.push(message);
    }

    fn finish(mut self, sessions: Vec<ParsedSession>, error: Option<String>) -> ParseReport {
        self.stats.duration = self.started.elapsed();
        ParseReport {
            success: !sessions.is_empty(),
            sessions,
            error,
            warnings: self.warnings,
            stats: self.stats,
        }
    }

    fn parse_session(&mut self, index: usize, entry: &Value) -> Result<ParsedSession, String> {
        let obj = entry
            .as_object()
            .ok_or_else(|| format!("expected an object, got {}", value_kind(entry)))?;

        let id = match session_id(obj) {
            Some(id) => id.to_string(),
            None if self.config.require_session_id => {
                return Err("missing session id".to_string());
            }
            None => {
                let id = format!("session-{}-{}", self.now.timestamp_millis(), index);
                self.warn(format!("session {} has no id; using {}", index, id));
                id
            }
        };

        let raw_messages = obj
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| format!("{}: messages is not an array", id))?;

        let mut messages = Vec::with_capacity(raw_messages.len());
        for (position, raw) in raw_messages.iter().enumerate() {
            self.stats.messages_seen += 1;
            match self.parse_message(&id, position, raw) {
                Ok(message) => {
                    self.stats.messages_valid += 1;
                    messages.push(message);
                }
                Err(reason) => {
                    self.stats.messages_rejected += 1;
                    if self.config.strict {
                        return Err(format!("{}: message {} invalid: {}", id, position, reason));
                    }
                    self.warn(format!(
                        "{}: skipping message {}: {}",
                        id, position, reason
                    ));
                }
            }
        }

        if messages.is_empty() && !self.config.allow_empty_sessions {
            return Err(format!("{}: no valid messages", id));
        }

        let custom_title = ["customTitle", "title"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .map(str::to_string);
        let created_at = self.session_timestamp(&id, obj, "createdAt");
        let last_modified = self.session_timestamp(&id, obj, "lastModified");

        Ok(ParsedSession {
            id,
            messages,
            custom_title,
            created_at,
            last_modified,
        })
    }

    fn parse_message(
        &mut self,
        session: &str,
        position: usize,
        raw: &Value,
    ) -> Result<ParsedMessage, String> {
        let obj = raw
            .as_object()
            .ok_or_else(|| format!("expected an object, got {}", value_kind(raw)))?;

        let role = match obj.get("role") {
            Some(Value::String(role)) => role.parse::<Role>()?,
            Some(other) => return Err(format!("role is {}", value_kind(other))),
            None => return Err("missing role".to_string()),
        };

        let content = match obj.get("content") {
            Some(Value::String(content)) => content.clone(),
            Some(other) => return Err(format!("content is {}", value_kind(other))),
            None => return Err("missing content".to_string()),
        };

        let timestamp = match obj.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(raw_ts) => {
                let label = format!("{}: message {} timestamp", session, position);
                self.checked_timestamp(&label, raw_ts)
                    .map(|at| at.timestamp_millis())
            }
        };

        Ok(ParsedMessage {
            role,
            content,
            timestamp,
        })
    }

    fn session_timestamp(
        &mut self,
        session: &str,
        obj: &Map<String, Value>,
        field: &str,
    ) -> Option<DateTime<Utc>> {
        match obj.get(field) {
            None | Some(Value::Null) => None,
            Some(raw) => self.checked_timestamp(&format!("{}: {}", session, field), raw),
        }
    }

    /// Parse a timestamp, warning when it cannot be read or looks implausible.
    fn checked_timestamp(&mut self, label: &str, raw: &Value) -> Option<DateTime<Utc>> {
        let Some(at) = parse_timestamp(raw) else {
            self.warn(format!("{} {} is not a recognized timestamp", label, raw));
            return None;
        };

        if self.config.validate_timestamps {
            if at > self.now + ChronoDuration::minutes(FUTURE_TOLERANCE_MINUTES) {
                self.warn(format!("{} {} is in the future", label, at.to_rfc3339()));
            } else if at < self.now - ChronoDuration::days(MAX_AGE_DAYS) {
                self.warn(format!(
                    "{} {} is more than a year old",
                    label,
                    at.to_rfc3339()
                ));
            }
        }
        Some(at)
    }
}

fn session_id(obj: &Map<String, Value>) -> Option<&str> {
    ["id", "sessionId"]
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|id| !id.is_empty())
}

/// Read a stored timestamp: epoch milliseconds or a date string.
///
/// Accepted strings are RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.fff]`,
/// `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD`. Naive values are taken as UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
