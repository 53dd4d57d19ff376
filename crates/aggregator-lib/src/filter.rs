//! Flow filters evaluated against flow keys

use crate::models::{Action, FlowKey, Reporter};
use crate::policy::{self, PolicyMatch};
use serde::{Deserialize, Serialize};

/// How a string criterion compares against a key field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Exact,
    /// Substring match, for partially typed names
    Fuzzy,
}

/// One accepted value for a string field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringMatch {
    pub value: String,
    #[serde(default, rename = "type")]
    pub match_type: MatchType,
}

impl StringMatch {
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            match_type: MatchType::Exact,
        }
    }

    pub fn fuzzy(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            match_type: MatchType::Fuzzy,
        }
    }

    fn accepts(&self, candidate: &str) -> bool {
        match self.match_type {
            MatchType::Exact => candidate == self.value,
            MatchType::Fuzzy => candidate.contains(&self.value),
        }
    }
}

/// Inclusive destination port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub low: i64,
    pub high: i64,
}

impl PortRange {
    pub fn single(port: i64) -> Self {
        Self {
            low: port,
            high: port,
        }
    }

    fn contains(&self, port: i64) -> bool {
        port >= self.low && port <= self.high
    }
}

/// Conjunction of optional predicates over a flow key.
///
/// An empty list or `None` leaves that field unconstrained; a list accepts a
/// key when any of its entries matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub source_names: Vec<StringMatch>,
    pub source_namespaces: Vec<StringMatch>,
    pub dest_names: Vec<StringMatch>,
    pub dest_namespaces: Vec<StringMatch>,
    pub protocols: Vec<String>,
    pub dest_ports: Option<PortRange>,
    pub actions: Vec<Action>,
    pub reporter: Option<Reporter>,
    pub policies: Vec<PolicyMatch>,
}

impl Filter {
    /// Whether the key satisfies every specified predicate
    pub fn matches(&self, key: &FlowKey) -> bool {
        any_string(&self.source_names, &key.source_name)
            && any_string(&self.source_namespaces, &key.source_namespace)
            && any_string(&self.dest_names, &key.dest_name)
            && any_string(&self.dest_namespaces, &key.dest_namespace)
            && (self.protocols.is_empty()
                || self
                    .protocols
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(&key.proto)))
            && self.dest_ports.map_or(true, |r| r.contains(key.dest_port))
            && (self.actions.is_empty() || self.actions.contains(&key.action))
            && self.reporter.map_or(true, |r| r == key.reporter)
            && (self.policies.is_empty()
                || self
                    .policies
                    .iter()
                    .any(|m| policy::matches(&key.policies, m)))
    }

    pub fn is_empty(&self) -> bool {
        self == &Filter::default()
    }
}

fn any_string(criteria: &[StringMatch], candidate: &str) -> bool {
    criteria.is_empty() || criteria.iter().any(|c| c.accepts(candidate))
}
