// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Service check model and the DogStatsD service check line parser.
//!
//! Wire grammar:
//! `_sc|<name>|<status 0..3>[|d:<ts>][|h:<host>][|#<tags>][|m:<msg>]`

use crate::errors::ParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceCheckStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl ServiceCheckStatus {
    fn from_token(token: &str) -> Result<Self, ParseError> {
        match token {
            "0" => Ok(ServiceCheckStatus::Ok),
            "1" => Ok(ServiceCheckStatus::Warning),
            "2" => Ok(ServiceCheckStatus::Critical),
            "3" => Ok(ServiceCheckStatus::Unknown),
            other => Err(ParseError::InvalidServiceCheckStatus(other.to_string())),
        }
    }
}

/// One decoded service check. `host` is filled from the `h:` field at
/// parse time and falls back to the enriched host when absent.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceCheck {
    pub name: String,
    pub timestamp: i64,
    pub status: ServiceCheckStatus,
    pub message: String,
    pub host: String,
    pub tags: Vec<String>,
}

/// Decodes one service check line.
pub fn parse_service_check(message: &str) -> Result<ServiceCheck, ParseError> {
    let rest = message
        .strip_prefix("_sc|")
        .ok_or(ParseError::MalformedServiceCheck)?;

    let mut fields = rest.split('|');
    let name = match fields.next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(ParseError::MalformedServiceCheck),
    };
    let status = match fields.next() {
        Some(token) => ServiceCheckStatus::from_token(token)?,
        None => return Err(ParseError::MalformedServiceCheck),
    };

    let mut check = ServiceCheck {
        name,
        timestamp: 0,
        status,
        message: String::new(),
        host: String::new(),
        tags: Vec::new(),
    };

    for field in fields.filter(|f| !f.is_empty()) {
        if let Some(ts) = field.strip_prefix("d:") {
            check.timestamp = ts
                .parse()
                .map_err(|_| ParseError::MalformedServiceCheck)?;
        } else if let Some(host) = field.strip_prefix("h:") {
            check.host = host.to_string();
        } else if let Some(msg) = field.strip_prefix("m:") {
            check.message = msg.to_string();
        } else if let Some(tag_section) = field.strip_prefix('#') {
            check.tags.extend(
                tag_section
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
            );
        }
    }

    Ok(check)
}
