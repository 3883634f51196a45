//! Server-side message filters.
//!
//! An expression is one or more clauses joined by `&&`. Each clause is a
//! regular expression, optionally scoped to one part of the record:
//!
//! - `key:<regex>` matches the decoded key
//! - `value:<regex>` matches the decoded value
//! - `header.<name>:<regex>` matches the value of header `<name>`
//! - `<regex>` matches either the key or the value
//!
//! A record passes when every clause matches.

use regex::Regex;
use thiserror::Error;

use crate::message::TopicMessage;

const CLAUSE_SEPARATOR: &str = "&&";

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("filter expression is empty")]
    Empty,
    #[error("invalid pattern in filter clause '{clause}': {source}")]
    Pattern {
        clause: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
enum Target {
    Key,
    Value,
    Header(String),
    KeyOrValue,
}

#[derive(Debug, Clone)]
struct Clause {
    target: Target,
    pattern: Regex,
}

impl Clause {
    fn parse(raw: &str) -> Result<Self, FilterError> {
        let (target, pattern) = split_target(raw);
        let pattern = Regex::new(pattern).map_err(|source| FilterError::Pattern {
            clause: raw.to_string(),
            source,
        })?;
        Ok(Self { target, pattern })
    }

    fn matches(&self, message: &TopicMessage) -> bool {
        match &self.target {
            Target::Key => self.pattern.is_match(&message.key.as_filter_text()),
            Target::Value => self.pattern.is_match(&message.value.as_filter_text()),
            Target::Header(name) => message
                .headers
                .iter()
                .filter(|h| &h.key == name)
                .any(|h| self.pattern.is_match(&h.value.as_filter_text())),
            Target::KeyOrValue => {
                self.pattern.is_match(&message.key.as_filter_text())
                    || self.pattern.is_match(&message.value.as_filter_text())
            }
        }
    }
}

fn split_target(raw: &str) -> (Target, &str) {
    if let Some(rest) = raw.strip_prefix("key:") {
        return (Target::Key, rest.trim());
    }
    if let Some(rest) = raw.strip_prefix("value:") {
        return (Target::Value, rest.trim());
    }
    if let Some(rest) = raw.strip_prefix("header.") {
        if let Some((name, pattern)) = rest.split_once(':') {
            if !name.is_empty() {
                return (Target::Header(name.to_string()), pattern.trim());
            }
        }
    }
    (Target::KeyOrValue, raw)
}

/// A compiled filter expression.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    clauses: Vec<Clause>,
}

impl MessageFilter {
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        let clauses = expression
            .split(CLAUSE_SEPARATOR)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(Clause::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if clauses.is_empty() {
            return Err(FilterError::Empty);
        }
        Ok(Self { clauses })
    }

    pub fn matches(&self, message: &TopicMessage) -> bool {
        self.clauses.iter().all(|c| c.matches(message))
    }
}
