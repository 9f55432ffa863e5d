//! # Reconcile Plan Selection
//!
//! TargetGroup, Listener, Rule and LoadBalancer all share the same
//! reconcile state machine. The selection lives here once, parameterized
//! by the per-kind needs-modification comparator, instead of duplicating
//! the switch in every reconciler.

/// The action a single reconcile pass will take for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Nothing to do: either the resource should not and does not exist,
    /// or current already matches desired
    NoOp,
    /// Desired side is absent, current exists: remove the cloud resource
    Delete,
    /// Desired side exists, nothing in the cloud yet: create it
    Create,
    /// Both sides exist and at least one compared field differs
    Modify,
}

/// Select the plan for a Desired/Current pair.
///
/// Precedence is evaluated in this exact order, first match wins:
/// absent/absent → NoOp, absent/present → Delete, present/absent → Create,
/// comparator true → Modify, otherwise NoOp.
pub fn plan<D, C, F>(desired: Option<&D>, current: Option<&C>, needs_modification: F) -> Plan
where
    F: FnOnce(&D, &C) -> bool,
{
    match (desired, current) {
        (None, None) => Plan::NoOp,
        (None, Some(_)) => Plan::Delete,
        (Some(_), None) => Plan::Create,
        (Some(d), Some(c)) => {
            if needs_modification(d, c) {
                Plan::Modify
            } else {
                Plan::NoOp
            }
        }
    }
}
