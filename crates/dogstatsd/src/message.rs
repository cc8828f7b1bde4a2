// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splits a datagram into messages and classifies them by their leading
//! sentinel.

/// The three shapes a DogStatsD line can take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    MetricSample,
    Event,
    ServiceCheck,
}

/// Classifies a single line by its leading sentinel. Anything that is not
/// an event or a service check is assumed to be a metric sample.
pub fn find_message_type(message: &str) -> MessageType {
    if message.starts_with("_e{") {
        MessageType::Event
    } else if message.starts_with("_sc|") {
        MessageType::ServiceCheck
    } else {
        MessageType::MetricSample
    }
}

/// Advances `packet` past the next newline and returns the line before it,
/// skipping empty lines. A trailing `\r` is stripped so CRLF clients are
/// accepted. Returns `None` once the packet is exhausted.
pub fn next_message<'a>(packet: &mut &'a str) -> Option<&'a str> {
    loop {
        let current = *packet;
        if current.is_empty() {
            return None;
        }

        let line = match current.find('\n') {
            Some(pos) => {
                *packet = &current[pos + 1..];
                &current[..pos]
            }
            None => {
                *packet = "";
                current
            }
        };

        let line = line.strip_suffix('\r').unwrap_or(line);
        if !line.is_empty() {
            return Some(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_message_type() {
        assert_eq!(
            find_message_type("_e{5,5}:hello|world"),
            MessageType::Event
        );
        assert_eq!(find_message_type("_sc|db.ping|0"), MessageType::ServiceCheck);
        assert_eq!(find_message_type("page.views:1|c"), MessageType::MetricSample);
        // An unknown sentinel falls through to the metric parser, which
        // rejects it as a parse error.
        assert_eq!(find_message_type("_x|gibberish"), MessageType::MetricSample);
    }

    #[test]
    fn test_next_message_splits_in_order() {
        let mut packet = "a:1|c\nb:2|g\nc:3|ms";
        assert_eq!(next_message(&mut packet), Some("a:1|c"));
        assert_eq!(next_message(&mut packet), Some("b:2|g"));
        assert_eq!(next_message(&mut packet), Some("c:3|ms"));
        assert_eq!(next_message(&mut packet), None);
    }

    #[test]
    fn test_next_message_no_trailing_empty_line() {
        let mut packet = "a:1|c\n";
        assert_eq!(next_message(&mut packet), Some("a:1|c"));
        assert_eq!(next_message(&mut packet), None);
    }

    #[test]
    fn test_next_message_skips_blank_lines() {
        let mut packet = "\n\na:1|c\n\nb:2|g\n";
        assert_eq!(next_message(&mut packet), Some("a:1|c"));
        assert_eq!(next_message(&mut packet), Some("b:2|g"));
        assert_eq!(next_message(&mut packet), None);
    }

    #[test]
    fn test_next_message_strips_carriage_return() {
        let mut packet = "a:1|c\r\nb:2|g\r\n";
        assert_eq!(next_message(&mut packet), Some("a:1|c"));
        assert_eq!(next_message(&mut packet), Some("b:2|g"));
        assert_eq!(next_message(&mut packet), None);
    }
}
