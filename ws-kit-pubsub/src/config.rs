//! Topic contract: pattern and length limits, mirroring
//! `ws_kit_core::limits::LimitsManager`'s plain-struct-with-defaults shape.

use regex::Regex;

/// Why a topic failed validation. Carried verbatim into `RouterError::details`
/// as `{"reason": "pattern" | "length"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRejectReason {
    Pattern,
    Length,
}

impl TopicRejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TopicRejectReason::Pattern => "pattern",
            TopicRejectReason::Length => "length",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopicLimits {
    pub pattern: Regex,
    pub max_length: usize,
}

impl Default for TopicLimits {
    fn default() -> Self {
        Self {
            pattern: Regex::new(r"^[A-Za-z0-9_.:-]+$").expect("default topic pattern is valid"),
            max_length: 256,
        }
    }
}

impl TopicLimits {
    pub fn new(pattern: Regex, max_length: usize) -> Self {
        Self { pattern, max_length }
    }

    /// Length is checked first so a topic failing both checks is always
    /// reported as `length`, never `pattern`.
    pub fn validate(&self, topic: &str) -> Result<(), TopicRejectReason> {
        if topic.len() > self.max_length {
            return Err(TopicRejectReason::Length);
        }
        if !self.pattern.is_match(topic) {
            return Err(TopicRejectReason::Pattern);
        }
        Ok(())
    }
}
