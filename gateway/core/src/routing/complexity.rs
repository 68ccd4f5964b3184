//! Request complexity classification
//!
//! Complexity comes from prompt plus context length. A keyword pass over the
//! prompt adds an optional task hint (code, analysis, creative) that gives an
//! extra affinity boost to a matching capability class.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::catalog::CapabilityClass;

/// Complexity class
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
    Expert,
}

impl Complexity {
    /// Capability classes that suit this complexity
    #[must_use]
    pub fn preferred(self) -> &'static [CapabilityClass] {
        match self {
            Self::Simple => &[CapabilityClass::FastResponse],
            Self::Medium => &[CapabilityClass::HighQuality, CapabilityClass::Creative],
            Self::Complex => &[
                CapabilityClass::HighQuality,
                CapabilityClass::Code,
                CapabilityClass::Analysis,
            ],
            Self::Expert => &[CapabilityClass::Analysis, CapabilityClass::HighQuality],
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
            Self::Expert => "expert",
        };
        f.write_str(name)
    }
}

/// Length thresholds in characters (prompt + context)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityThresholds {
    /// At or above this length a request is at least medium
    pub medium_chars: usize,
    /// At or above this length a request is at least complex
    pub complex_chars: usize,
    /// At or above this length a request is expert
    pub expert_chars: usize,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            medium_chars: 200,
            complex_chars: 1_000,
            expert_chars: 4_000,
        }
    }
}

impl ComplexityThresholds {
    #[must_use]
    pub fn classify(&self, chars: usize) -> Complexity {
        if chars >= self.expert_chars {
            Complexity::Expert
        } else if chars >= self.complex_chars {
            Complexity::Complex
        } else if chars >= self.medium_chars {
            Complexity::Medium
        } else {
            Complexity::Simple
        }
    }

    /// Whether thresholds strictly increase
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.medium_chars < self.complex_chars && self.complex_chars < self.expert_chars
    }
}

/// Task hint from prompt keywords
#[must_use]
pub fn task_hint(prompt: &str) -> Option<CapabilityClass> {
    let lower = prompt.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if any(&["```", "function", "implement", "compile", "stack trace", "refactor", "bug"]) {
        Some(CapabilityClass::Code)
    } else if any(&["analyze", "analyse", "compare", "step by step", "evaluate", "prove"]) {
        Some(CapabilityClass::Analysis)
    } else if any(&["poem", "story", "lyrics", "imagine", "creative"]) {
        Some(CapabilityClass::Creative)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_classes() {
        let t = ComplexityThresholds::default();
        assert_eq!(t.classify(0), Complexity::Simple);
        assert_eq!(t.classify(199), Complexity::Simple);
        assert_eq!(t.classify(200), Complexity::Medium);
        assert_eq!(t.classify(1_000), Complexity::Complex);
        assert_eq!(t.classify(10_000), Complexity::Expert);
    }

    #[test]
    fn test_task_hints() {
        assert_eq!(task_hint("Fix this bug in my parser"), Some(CapabilityClass::Code));
        assert_eq!(task_hint("Compare X and Y"), Some(CapabilityClass::Analysis));
        assert_eq!(task_hint("Write a poem"), Some(CapabilityClass::Creative));
        assert_eq!(task_hint("hello"), None);
    }

    #[test]
    fn test_ordering_check() {
        assert!(ComplexityThresholds::default().is_ordered());
        let bad = ComplexityThresholds {
            medium_chars: 500,
            complex_chars: 400,
            expert_chars: 4_000,
        };
        assert!(!bad.is_ordered());
    }
}
