// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event model and the DogStatsD event line parser.
//!
//! Wire grammar:
//! `_e{<titleLen>,<textLen>}:<title>|<text>[|d:<ts>][|h:<host>]`
//! `[|k:<aggKey>][|p:<priority>][|s:<source>][|t:<alert>][|#<tags>]`

use crate::errors::ParseError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventPriority {
    #[default]
    Normal,
    Low,
}

impl EventPriority {
    // Unknown tokens fall back to the neutral value.
    fn from_token(token: &str) -> Self {
        match token {
            "low" => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventAlertType {
    Success,
    #[default]
    Info,
    Warning,
    Error,
}

impl EventAlertType {
    fn from_token(token: &str) -> Self {
        match token {
            "success" => EventAlertType::Success,
            "warning" => EventAlertType::Warning,
            "error" => EventAlertType::Error,
            _ => EventAlertType::Info,
        }
    }
}

/// One decoded event. `host` is filled from the `h:` field at parse time
/// and falls back to the enriched host when the field was absent.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub title: String,
    pub text: String,
    pub timestamp: i64,
    pub priority: EventPriority,
    pub host: String,
    pub aggregation_key: String,
    pub source_type_name: String,
    pub alert_type: EventAlertType,
    pub tags: Vec<String>,
}

/// Decodes one event line.
///
/// The declared title and text lengths are byte counts into the payload;
/// a header pointing past the end of the line fails the parse.
pub fn parse_event(message: &str) -> Result<Event, ParseError> {
    let header = message
        .strip_prefix("_e{")
        .ok_or(ParseError::MalformedEvent)?;
    let (lengths, payload) = header.split_once("}:").ok_or(ParseError::MalformedEvent)?;
    let (title_len, text_len) = lengths.split_once(',').ok_or(ParseError::MalformedEvent)?;
    let title_len: usize = title_len.parse().map_err(|_| ParseError::MalformedEvent)?;
    let text_len: usize = text_len.parse().map_err(|_| ParseError::MalformedEvent)?;

    if title_len == 0 {
        return Err(ParseError::MalformedEvent);
    }

    let title = payload
        .get(..title_len)
        .ok_or(ParseError::EventLengthOverflow)?;
    let text_start = title_len + 1;
    let text_end = text_start + text_len;
    if payload.as_bytes().get(title_len) != Some(&b'|') {
        return Err(ParseError::EventLengthOverflow);
    }
    let text = payload
        .get(text_start..text_end)
        .ok_or(ParseError::EventLengthOverflow)?;

    let mut event = Event {
        title: title.to_string(),
        text: text.replace("\\n", "\n"),
        timestamp: 0,
        priority: EventPriority::Normal,
        host: String::new(),
        aggregation_key: String::new(),
        source_type_name: String::new(),
        alert_type: EventAlertType::Info,
        tags: Vec::new(),
    };

    for field in payload[text_end..].split('|').filter(|f| !f.is_empty()) {
        if let Some(ts) = field.strip_prefix("d:") {
            event.timestamp = ts.parse().map_err(|_| ParseError::MalformedEvent)?;
        } else if let Some(host) = field.strip_prefix("h:") {
            event.host = host.to_string();
        } else if let Some(key) = field.strip_prefix("k:") {
            event.aggregation_key = key.to_string();
        } else if let Some(priority) = field.strip_prefix("p:") {
            event.priority = EventPriority::from_token(priority);
        } else if let Some(source) = field.strip_prefix("s:") {
            event.source_type_name = source.to_string();
        } else if let Some(alert) = field.strip_prefix("t:") {
            event.alert_type = EventAlertType::from_token(alert);
        } else if let Some(tag_section) = field.strip_prefix('#') {
            event.tags.extend(
                tag_section
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
            );
        }
    }

    Ok(event)
}
