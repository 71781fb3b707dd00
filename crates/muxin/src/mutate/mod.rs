// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mutation values and the rule engine that resolves them.
//!
//! A [`Mutation`] carries an object's current mixin-id set plus the requested
//! additions and removals, not yet rule-resolved. Rules rewrite the request;
//! the engine re-runs the full rule list (in registration order) after any
//! pass that changed something and stops at a fixpoint. A configuration
//! whose rules never converge — a mixin both mandatory and deprecated, say —
//! is reported as [`Error::RuleConflict`] once the pass bound is exceeded;
//! no precedence order between contradicting rules is invented.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::MixinId;

/// Upper bound on full rule passes before a mutation is declared
/// contradictory.
pub(crate) const MAX_RULE_PASSES: u32 = 32;

/// A requested change to an object's mixin set, visible to mutation rules.
///
/// Additions are recency-ordered: the most recently requested addition is
/// last. Rules query and rewrite the request through the methods below; the
/// final set is `(base U adding) \ removing`.
pub struct Mutation {
    base: Vec<MixinId>,
    adding: Vec<MixinId>,
    removing: Vec<MixinId>,
    changed: bool,
}

impl Mutation {
    pub(crate) fn new(base: &[MixinId]) -> Self {
        let mut base = base.to_vec();
        base.sort_unstable();
        base.dedup();
        Self {
            base,
            adding: Vec::new(),
            removing: Vec::new(),
            changed: false,
        }
    }

    /// Whether the object already carries `id`.
    pub fn has_base(&self, id: MixinId) -> bool {
        self.base.binary_search(&id).is_ok()
    }

    /// Whether `id` is currently requested to be added.
    pub fn is_adding(&self, id: MixinId) -> bool {
        self.adding.contains(&id)
    }

    /// Whether `id` is currently requested to be removed.
    pub fn is_removing(&self, id: MixinId) -> bool {
        self.removing.contains(&id)
    }

    /// Whether `id` would be present once the mutation is applied as-is.
    pub fn will_have(&self, id: MixinId) -> bool {
        (self.has_base(id) || self.is_adding(id)) && !self.is_removing(id)
    }

    /// Requests the addition of `id`, cancelling any pending removal. An
    /// already pending addition moves to the back (it becomes the most
    /// recent).
    pub fn add(&mut self, id: MixinId) {
        self.cancel_remove(id);
        match self.adding.iter().position(|&m| m == id) {
            Some(pos) if pos + 1 == self.adding.len() => {}
            Some(pos) => {
                self.adding.remove(pos);
                self.adding.push(id);
                self.changed = true;
            }
            None => {
                self.adding.push(id);
                self.changed = true;
            }
        }
    }

    /// Requests the removal of `id`, cancelling any pending addition.
    pub fn remove(&mut self, id: MixinId) {
        self.cancel_add(id);
        if !self.is_removing(id) {
            self.removing.push(id);
            self.changed = true;
        }
    }

    /// Drops a pending addition of `id`, if any.
    pub fn cancel_add(&mut self, id: MixinId) {
        if let Some(pos) = self.adding.iter().position(|&m| m == id) {
            self.adding.remove(pos);
            self.changed = true;
        }
    }

    /// Drops a pending removal of `id`, if any.
    pub fn cancel_remove(&mut self, id: MixinId) {
        if let Some(pos) = self.removing.iter().position(|&m| m == id) {
            self.removing.remove(pos);
            self.changed = true;
        }
    }

    /// The most recently requested addition among `set`, if any.
    pub fn latest_addition_of(&self, set: &[MixinId]) -> Option<MixinId> {
        self.adding.iter().rev().copied().find(|id| set.contains(id))
    }

    /// The final, normalized mixin-id set this mutation produces.
    pub fn result(&self) -> Vec<MixinId> {
        let mut out = self.base.clone();
        out.extend_from_slice(&self.adding);
        out.sort_unstable();
        out.dedup();
        out.retain(|id| !self.is_removing(*id));
        out
    }

    fn take_changed(&mut self) -> bool {
        std::mem::replace(&mut self.changed, false)
    }
}

/// User-defined mutation rule. Stateless with respect to any single object;
/// operates purely on the mutation value.
pub trait MutationRuleHook: Send + Sync {
    /// Rewrites the mutation. Must be idempotent on its own output, or the
    /// engine will report a rule conflict.
    fn apply_to(&self, mutation: &mut Mutation);
}

/// The closed set of built-in rule kinds, plus a user-defined escape hatch.
#[derive(Clone)]
pub enum MutationRule {
    /// Unconditionally present; removals of it are undone.
    Mandatory(MixinId),
    /// Unconditionally absent; additions of it are undone.
    Deprecated(MixinId),
    /// Additions of `from` are rewritten to additions of `to`.
    Substitute {
        /// Never actually added.
        from: MixinId,
        /// Added in its place.
        to: MixinId,
    },
    /// At most one member stays; the most recently requested addition wins.
    MutuallyExclusive(Vec<MixinId>),
    /// Adding any member adds all; removing any member removes all.
    Bundled(Vec<MixinId>),
    /// Adding/removing the master adds/removes the deps; touching a dep
    /// directly cascades nothing.
    Dependent {
        /// The mixin whose presence drives the group.
        master: MixinId,
        /// Added and removed alongside the master.
        deps: Vec<MixinId>,
    },
    /// A caller-provided rule.
    Custom(Arc<dyn MutationRuleHook>),
}

impl std::fmt::Debug for MutationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationRule::Mandatory(id) => write!(f, "Mandatory({})", id),
            MutationRule::Deprecated(id) => write!(f, "Deprecated({})", id),
            MutationRule::Substitute { from, to } => write!(f, "Substitute({} -> {})", from, to),
            MutationRule::MutuallyExclusive(set) => write!(f, "MutuallyExclusive({:?})", set),
            MutationRule::Bundled(set) => write!(f, "Bundled({:?})", set),
            MutationRule::Dependent { master, deps } => {
                write!(f, "Dependent({} -> {:?})", master, deps)
            }
            MutationRule::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl MutationRule {
    /// Ids this rule refers to, for registration-time validation.
    pub(crate) fn referenced_ids(&self) -> Vec<MixinId> {
        match self {
            MutationRule::Mandatory(id) | MutationRule::Deprecated(id) => vec![*id],
            MutationRule::Substitute { from, to } => vec![*from, *to],
            MutationRule::MutuallyExclusive(set) | MutationRule::Bundled(set) => set.clone(),
            MutationRule::Dependent { master, deps } => {
                let mut ids = deps.clone();
                ids.push(*master);
                ids
            }
            MutationRule::Custom(_) => Vec::new(),
        }
    }

    fn apply_to(&self, m: &mut Mutation) {
        match self {
            MutationRule::Mandatory(id) => {
                m.cancel_remove(*id);
                if !m.will_have(*id) {
                    m.add(*id);
                }
            }
            MutationRule::Deprecated(id) => {
                m.cancel_add(*id);
                if m.has_base(*id) && !m.is_removing(*id) {
                    m.remove(*id);
                }
            }
            MutationRule::Substitute { from, to } => {
                if m.is_adding(*from) {
                    m.cancel_add(*from);
                    if !m.will_have(*to) {
                        m.add(*to);
                    }
                }
            }
            MutationRule::MutuallyExclusive(set) => {
                if let Some(keep) = m.latest_addition_of(set) {
                    for &other in set {
                        if other != keep && m.will_have(other) {
                            m.remove(other);
                        }
                    }
                }
            }
            MutationRule::Bundled(set) => {
                let adding_any = set.iter().any(|&id| m.is_adding(id));
                let removing_any = set.iter().any(|&id| m.is_removing(id));
                if adding_any {
                    for &id in set {
                        if !m.will_have(id) {
                            m.add(id);
                        }
                    }
                }
                if removing_any {
                    for &id in set {
                        if m.will_have(id) {
                            m.remove(id);
                        }
                    }
                }
            }
            MutationRule::Dependent { master, deps } => {
                if m.is_adding(*master) {
                    for &dep in deps {
                        if !m.will_have(dep) {
                            m.add(dep);
                        }
                    }
                }
                if m.is_removing(*master) {
                    for &dep in deps {
                        if m.will_have(dep) {
                            m.remove(dep);
                        }
                    }
                }
            }
            MutationRule::Custom(hook) => hook.apply_to(m),
        }
    }
}

/// Runs the rule list to a fixpoint, in registration order, re-running the
/// full pass after any change. Returns the final normalized id set.
pub(crate) fn resolve_rules(rules: &[MutationRule], m: &mut Mutation) -> Result<Vec<MixinId>> {
    m.take_changed();
    for _pass in 0..MAX_RULE_PASSES {
        for rule in rules {
            rule.apply_to(m);
        }
        if !m.take_changed() {
            return Ok(m.result());
        }
    }
    log::debug!("mutation rules failed to converge after {} passes", MAX_RULE_PASSES);
    Err(Error::RuleConflict {
        passes: MAX_RULE_PASSES,
    })
}
