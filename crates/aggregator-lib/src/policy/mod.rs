//! Policy traces attached to flow keys
//!
//! A trace records which policy rules evaluated a connection, split into the
//! rules that were enforced and the ones that would apply once pending
//! (staged) policy is enforced.

mod matcher;

pub use matcher::matches;

use crate::models::{Action, CanonicalDigest};
use serde::{Deserialize, Serialize};

/// Whether a policy name denotes a staged policy.
///
/// Staged policy support is deferred: this always returns false, so every
/// hit stays in the list the reporting node put it in.
pub fn policy_is_staged(_name: &str) -> bool {
    false
}

/// Kind of the policy that produced a hit
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Unspecified,
    CalicoNetworkPolicy,
    GlobalNetworkPolicy,
    StagedNetworkPolicy,
    StagedGlobalNetworkPolicy,
    StagedKubernetesNetworkPolicy,
    NetworkPolicy,
    AdminNetworkPolicy,
    BaselineAdminNetworkPolicy,
    Profile,
    /// Synthetic hit for the default action of a tier with no matching rule
    EndOfTier,
}

/// One rule evaluation within a policy trace
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PolicyHit {
    pub kind: PolicyKind,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tier: String,
    pub action: Action,
    #[serde(default)]
    pub policy_index: i64,
    #[serde(default)]
    pub rule_index: i64,
    /// Rule evaluation that caused the tier to be entered (end-of-tier hits only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Box<PolicyHit>>,
}

impl PolicyHit {
    pub(crate) fn encode(&self, digest: &mut CanonicalDigest) {
        digest
            .tag(self.kind as u8)
            .str(&self.namespace)
            .str(&self.name)
            .str(&self.tier)
            .tag(self.action as u8)
            .i64(self.policy_index)
            .i64(self.rule_index);
        match &self.trigger {
            Some(trigger) => {
                digest.tag(1);
                trigger.encode(digest);
            }
            None => {
                digest.tag(0);
            }
        }
    }

    pub fn is_end_of_tier(&self) -> bool {
        self.kind == PolicyKind::EndOfTier
    }

    /// The hit whose namespace and name identify the responsible policy.
    ///
    /// End-of-tier hits carry no identity of their own and resolve through
    /// their trigger chain; other hits are their own identity.
    pub fn identity(&self) -> Option<&PolicyHit> {
        if !self.is_end_of_tier() {
            return Some(self);
        }
        self.trigger.as_deref().and_then(PolicyHit::identity)
    }
}

/// Enforced and pending policy hits for a flow
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PolicyTrace {
    #[serde(default)]
    pub enforced: Vec<PolicyHit>,
    #[serde(default)]
    pub pending: Vec<PolicyHit>,
}

impl PolicyTrace {
    /// Canonical form used inside flow keys.
    ///
    /// Triggers are only kept on end-of-tier hits, and hits belonging to
    /// staged policies are moved to the pending list.
    pub fn normalize(self) -> PolicyTrace {
        let mut enforced = Vec::with_capacity(self.enforced.len());
        let mut pending = Vec::with_capacity(self.pending.len());

        for hit in self.enforced.into_iter().map(normalize_hit) {
            if policy_is_staged(&hit.name) {
                pending.push(hit);
            } else {
                enforced.push(hit);
            }
        }
        pending.extend(self.pending.into_iter().map(normalize_hit));

        PolicyTrace { enforced, pending }
    }

    pub(crate) fn encode(&self, digest: &mut CanonicalDigest) {
        for list in [&self.enforced, &self.pending] {
            digest.count(list.len());
            for hit in list {
                hit.encode(digest);
            }
        }
    }

    /// All hits, enforced first
    pub fn hits(&self) -> impl Iterator<Item = &PolicyHit> {
        self.enforced.iter().chain(self.pending.iter())
    }
}

fn normalize_hit(mut hit: PolicyHit) -> PolicyHit {
    if hit.is_end_of_tier() {
        hit.trigger = hit.trigger.map(|t| Box::new(normalize_hit(*t)));
    } else {
        hit.trigger = None;
    }
    hit
}

/// Which list of a trace a policy match inspects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceSelector {
    #[default]
    Any,
    Enforced,
    Pending,
}

/// Criterion over policy hits; empty fields are unconstrained
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyMatch {
    pub kind: Option<PolicyKind>,
    pub tier: String,
    pub namespace: String,
    pub name: String,
    pub action: Option<Action>,
    pub trace: TraceSelector,
}

impl PolicyMatch {
    /// Whether the match names a specific policy
    pub fn specifies_identity(&self) -> bool {
        !self.namespace.is_empty() || !self.name.is_empty()
    }
}
