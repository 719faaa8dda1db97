//! TAP result models
//!
//! Outcomes, plans and the per-test result produced by the parser.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Directive attached to a result line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "reason")]
pub enum Directive {
    Skip(String),
    Todo(String),
}

/// Declared plan (`1..N`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub count: usize,
    /// Reason given by `1..0 # SKIP reason`
    pub skip_reason: Option<String>,
}

/// A single `ok` / `not ok` outcome
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub number: usize,
    pub ok: bool,
    pub description: Option<String>,
    pub directive: Option<Directive>,
    /// Added by the harness rather than reported by the test
    #[serde(default)]
    pub synthetic: bool,
}

impl Outcome {
    pub fn new(number: usize, ok: bool) -> Self {
        Self {
            number,
            ok,
            description: None,
            directive: None,
            synthetic: false,
        }
    }

    /// Harness-generated failure
    pub fn synthetic_failure(number: usize, description: impl Into<String>) -> Self {
        Self {
            number,
            ok: false,
            description: Some(description.into()),
            directive: None,
            synthetic: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_directive(mut self, directive: Directive) -> Self {
        self.directive = Some(directive);
        self
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.directive, Some(Directive::Skip(_)))
    }

    pub fn is_todo(&self) -> bool {
        matches!(self.directive, Some(Directive::Todo(_)))
    }

    /// Counts against the test: `not ok` without SKIP or TODO
    pub fn is_failure(&self) -> bool {
        !self.ok && self.directive.is_none()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            write!(f, "ok {}", self.number)?;
        } else {
            write!(f, "not ok {}", self.number)?;
        }
        if let Some(desc) = &self.description {
            write!(f, " - {desc}")?;
        }
        match &self.directive {
            Some(Directive::Skip(reason)) => write!(f, " # SKIP {reason}")?,
            Some(Directive::Todo(reason)) => write!(f, " # TODO {reason}")?,
            None => {}
        }
        Ok(())
    }
}

/// Everything the parser learned about one test
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapResult {
    pub plan: Option<Plan>,
    pub outcomes: Vec<Outcome>,
    /// `#` lines, verbatim
    pub comments: Vec<String>,
    pub bailed_out: Option<String>,
    /// `None` if the process never ran or died from a signal
    pub exit_status: Option<i32>,
    /// Malformed or out-of-sequence lines, in arrival order
    #[serde(default)]
    pub protocol_errors: Vec<String>,
}

impl TapResult {
    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.ok && !o.is_skipped()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_skipped()).count()
    }

    /// Outcomes reported by the test itself
    pub fn reported_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.synthetic).count()
    }
}
