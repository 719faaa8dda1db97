//! Incremental TAP parser
//!
//! Consumes one test's output a line at a time and builds a [`TapResult`].
//! Protocol problems never abort parsing; they are folded into a single
//! synthetic failing outcome when the stream ends. Indented lines
//! (subtests) are not interpreted.

use tracing::{debug, trace};

use crate::models::{Directive, Outcome, Plan, TapResult};

const BAIL_OUT: &str = "Bail out!";

/// What a single line meant
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TapEvent {
    Version,
    Plan(Plan),
    Result(Outcome),
    Comment(String),
    BailOut(String),
    /// Not TAP; kept only for verbose display
    Other,
    /// Line arrived after a bail-out
    Ignored,
}

impl TapEvent {
    /// A failing outcome or a bail-out
    pub fn is_failure(&self) -> bool {
        match self {
            TapEvent::Result(outcome) => outcome.is_failure(),
            TapEvent::BailOut(_) => true,
            _ => false,
        }
    }
}

/// Parser state for one test
#[derive(Debug, Default)]
pub struct TapParser {
    result: TapResult,
    seen: usize,
    protocol_errors: Vec<String>,
}

impl TapParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of result lines seen so far
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn bailed_out(&self) -> bool {
        self.result.bailed_out.is_some()
    }

    /// Feed one line of output
    pub fn feed(&mut self, line: &str) -> TapEvent {
        if self.bailed_out() {
            return TapEvent::Ignored;
        }

        let line = line.trim_end();
        trace!(line, "tap line");

        if let Some(reason) = line.strip_prefix(BAIL_OUT) {
            let reason = reason.trim().to_string();
            self.bail_out(&reason);
            return TapEvent::BailOut(reason);
        }

        if line.starts_with("TAP version") {
            return TapEvent::Version;
        }

        if line.starts_with('#') {
            self.result.comments.push(line.to_string());
            return TapEvent::Comment(line.to_string());
        }

        if let Some(rest) = line.strip_prefix("1..") {
            return match parse_plan(rest) {
                Some(plan) => {
                    if self.result.plan.is_some() {
                        self.protocol_errors
                            .push("more than one plan declared".to_string());
                    } else {
                        self.result.plan = Some(plan.clone());
                    }
                    TapEvent::Plan(plan)
                }
                None => {
                    self.protocol_errors.push(format!("malformed plan: {line}"));
                    TapEvent::Other
                }
            };
        }

        if let Some((ok, rest)) = split_status(line) {
            let outcome = self.parse_result(ok, rest);
            self.result.outcomes.push(outcome.clone());
            return TapEvent::Result(outcome);
        }

        TapEvent::Other
    }

    fn parse_result(&mut self, ok: bool, rest: &str) -> Outcome {
        let (body, directive) = split_directive(rest);
        let body = body.trim();

        let digits_end = body
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(body.len());
        let expected = self.seen + 1;
        self.seen += 1;

        let (number, description) = match body[..digits_end].parse::<usize>() {
            Ok(n) => (n, &body[digits_end..]),
            Err(_) => (expected, body),
        };
        if number != expected {
            self.protocol_errors.push(format!(
                "test {number} out of sequence, expected {expected}"
            ));
        }

        let description = description.trim_start();
        let description = description
            .strip_prefix('-')
            .unwrap_or(description)
            .trim();

        let mut outcome = Outcome::new(number, ok);
        if !description.is_empty() {
            outcome = outcome.with_description(description);
        }
        if let Some(directive) = directive {
            outcome = outcome.with_directive(directive);
        }
        outcome
    }

    fn bail_out(&mut self, reason: &str) {
        debug!(reason, "test bailed out");
        let planned = self.result.plan.as_ref().map(|p| p.count).unwrap_or(0);
        let before = self.result.outcomes.len();

        for number in self.seen + 1..=planned {
            self.result.outcomes.push(Outcome::synthetic_failure(
                number,
                format!("not run: bailed out ({reason})"),
            ));
        }
        if self.result.outcomes.len() == before {
            self.result.outcomes.push(Outcome::synthetic_failure(
                self.seen + 1,
                format!("Bail out! {reason}"),
            ));
        }
        self.result.bailed_out = Some(reason.to_string());
    }

    /// End of stream: validate the plan and attach the exit status
    pub fn finish(mut self, exit_status: Option<i32>) -> TapResult {
        if !self.bailed_out() {
            if let Some(problem) = self.problem() {
                debug!(problem = %problem, "tap stream inconsistent");
                self.result
                    .outcomes
                    .push(Outcome::synthetic_failure(self.seen + 1, problem));
            }
        }
        self.result.exit_status = exit_status;
        self.result.protocol_errors = self.protocol_errors;
        self.result
    }

    /// Stream cut short by the harness
    pub fn abort(mut self, reason: &str, exit_status: Option<i32>) -> TapResult {
        self.result.outcomes.push(Outcome::synthetic_failure(
            self.seen + 1,
            format!("terminated: {reason}"),
        ));
        self.result.exit_status = exit_status;
        self.result.protocol_errors = self.protocol_errors;
        self.result
    }

    fn problem(&self) -> Option<String> {
        if let Some(error) = self.protocol_errors.first() {
            return Some(error.clone());
        }
        match &self.result.plan {
            None => Some(format!("no plan found ({} tests seen)", self.seen)),
            Some(plan) if plan.count != self.seen => Some(format!(
                "planned {} tests but ran {}",
                plan.count, self.seen
            )),
            Some(_) => None,
        }
    }
}

/// `ok ...` / `not ok ...`; the keyword must end at whitespace or end of line
fn split_status(line: &str) -> Option<(bool, &str)> {
    let (ok, rest) = if let Some(rest) = line.strip_prefix("not ok") {
        (false, rest)
    } else if let Some(rest) = line.strip_prefix("ok") {
        (true, rest)
    } else {
        return None;
    };

    match rest.chars().next() {
        None => Some((ok, rest)),
        Some(c) if c.is_whitespace() => Some((ok, rest)),
        Some(_) => None,
    }
}

/// Plan body after `1..`
fn parse_plan(rest: &str) -> Option<Plan> {
    let rest = rest.trim();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let count = rest[..digits_end].parse::<usize>().ok()?;

    let tail = rest[digits_end..].trim();
    if tail.is_empty() {
        return Some(Plan {
            count,
            skip_reason: None,
        });
    }

    let comment = tail.strip_prefix('#')?.trim();
    let skip_reason = match keyword(comment, "skip") {
        Some(reason) if count == 0 => Some(reason.to_string()),
        _ => None,
    };
    Some(Plan { count, skip_reason })
}

/// Split off an unescaped `# SKIP` / `# TODO` directive
fn split_directive(rest: &str) -> (&str, Option<Directive>) {
    let mut escaped = false;
    for (idx, c) in rest.char_indices() {
        match c {
            '\\' => escaped = !escaped,
            '#' if !escaped => {
                let comment = rest[idx + 1..].trim();
                let directive = if let Some(reason) = keyword(comment, "skip") {
                    Some(Directive::Skip(reason.to_string()))
                } else {
                    keyword(comment, "todo").map(|reason| Directive::Todo(reason.to_string()))
                };
                return (&rest[..idx], directive);
            }
            _ => escaped = false,
        }
    }
    (rest, None)
}

/// Case-insensitive directive keyword; returns the reason after it.
/// `SKIPPED` and friends are accepted, as other TAP consumers do.
fn keyword<'a>(comment: &'a str, word: &str) -> Option<&'a str> {
    let head_len = comment
        .find(char::is_whitespace)
        .unwrap_or(comment.len());
    let head = &comment[..head_len];
    match head.get(..word.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(word) => Some(comment[head_len..].trim()),
        _ => None,
    }
}
