//! Routing decision for lookups: answered locally, owned by the immediate
//! successor, or forwarded along the finger table. Pure so that both the
//! stabilizer and the RPC server share one tested rule.

use crate::chord::id::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    /// We are alone, or the target is our own identifier.
    SelfOwns,
    /// The target falls in `(me, successor]`.
    SuccessorOwns,
    /// Neither; hand off to the closest preceding finger.
    Forward,
}

pub fn decide(target: &NodeId, me: &NodeId, successor: &NodeId) -> RouteDecision {
    if successor == me || target == me {
        RouteDecision::SelfOwns
    } else if target.in_interval(me, successor) {
        RouteDecision::SuccessorOwns
    } else {
        RouteDecision::Forward
    }
}

/// Callback form of [`decide`]: exactly one of the three branches runs.
pub fn judge<R>(
    target: &NodeId,
    me: &NodeId,
    successor: &NodeId,
    on_self_owns: impl FnOnce() -> R,
    on_successor_owns: impl FnOnce() -> R,
    on_forward: impl FnOnce() -> R,
) -> R {
    match decide(target, me, successor) {
        RouteDecision::SelfOwns => on_self_owns(),
        RouteDecision::SuccessorOwns => on_successor_owns(),
        RouteDecision::Forward => on_forward(),
    }
}
