//! # Topic names and subscription patterns.
//!
//! Topics are dot-namespaced strings such as `TTS.Request` or
//! `STT.TranscriptionDetected`. Subscriptions use a [`TopicPattern`]:
//!
//! ```text
//! "TTS.Started"   exact match only
//! "TTS.*"         `*` = exactly one segment, any position
//!                   ✓ TTS.Started   ✗ TTS.Sub.Started   ✗ TTS
//! "*.Started"       ✓ TTS.Started   ✓ STT.Started
//! "TTS.**"        `**` = one or more trailing segments (last position only)
//!                   ✓ TTS.Started   ✓ TTS.Sub.Started   ✗ TTS
//! ```
//!
//! Rejected at parse time: empty patterns, empty segments (`"A..B"`),
//! partial wildcards (`"TT*"`), `**` before the last segment, and patterns
//! made only of wildcards.

use std::fmt;

use crate::error::MessageError;

/// Validates a concrete topic (what a publisher sends to).
pub(crate) fn validate_topic(topic: &str) -> Result<(), MessageError> {
    if topic.is_empty() {
        return Err(MessageError::topic(topic, "empty topic"));
    }
    for seg in topic.split('.') {
        if seg.is_empty() {
            return Err(MessageError::topic(topic, "empty segment"));
        }
        if seg.contains('*') {
            return Err(MessageError::topic(topic, "wildcards are only allowed in subscriptions"));
        }
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    One,
    Rest,
}

/// A parsed subscription pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Parses and validates a pattern.
    ///
    /// # Example
    /// ```
    /// use switchboard::TopicPattern;
    ///
    /// let p = TopicPattern::parse("TTS.*").unwrap();
    /// assert!(p.matches("TTS.Started"));
    /// assert!(!p.matches("TTS.Sub.Started"));
    /// assert!(TopicPattern::parse("TTS..Started").is_err());
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, MessageError> {
        if pattern.is_empty() {
            return Err(MessageError::topic(pattern, "empty pattern"));
        }

        let parts: Vec<&str> = pattern.split('.').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let seg = match *part {
                "" => return Err(MessageError::topic(pattern, "empty segment")),
                "*" => Segment::One,
                "**" if i == last => Segment::Rest,
                "**" => return Err(MessageError::topic(pattern, "`**` must be the last segment")),
                p if p.contains('*') => {
                    return Err(MessageError::topic(pattern, "partial wildcard segment"))
                }
                p => Segment::Literal(p.to_string()),
            };
            segments.push(seg);
        }

        if !segments.iter().any(|s| matches!(s, Segment::Literal(_))) {
            return Err(MessageError::topic(pattern, "pattern needs at least one literal segment"));
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Returns the pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns `true` if the pattern contains no wildcard.
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Returns `true` if `topic` is routed to this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        if self.is_exact() {
            return self.raw == topic;
        }

        let mut parts = topic.split('.');
        for seg in &self.segments {
            match seg {
                Segment::Rest => return parts.next().is_some_and(|p| !p.is_empty()),
                Segment::One => match parts.next() {
                    Some(p) if !p.is_empty() => {}
                    _ => return false,
                },
                Segment::Literal(lit) => match parts.next() {
                    Some(p) if p == lit => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
