//! Resource state tracking and barrier planning.
//!
//! Each resource carries the state its last recorded barrier left it in.
//! Transition requests against the current state are elided; everything
//! else becomes exactly one barrier. Tracking is per resource, not per
//! subresource.

use crate::types::ResourceState;

/// One planned barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: ResourceState,
    pub to: ResourceState,
}

/// Decides whether moving from `current` to `target` needs a barrier.
///
/// Returns `None` when the resource is already in the target state. The
/// caller updates its tracked state only when a barrier is actually
/// recorded, so redundant requests cannot desynchronize the tracker.
pub fn plan_transition(current: ResourceState, target: ResourceState) -> Option<Transition> {
    if current == target {
        return None;
    }
    Some(Transition {
        from: current,
        to: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_state_is_elided() {
        assert_eq!(
            plan_transition(ResourceState::Common, ResourceState::Common),
            None
        );
        assert_eq!(
            plan_transition(ResourceState::CopyDst, ResourceState::CopyDst),
            None
        );
    }

    #[test]
    fn test_distinct_states_need_one_barrier() {
        let t = plan_transition(ResourceState::Common, ResourceState::RenderTarget)
            .expect("barrier expected");
        assert_eq!(t.from, ResourceState::Common);
        assert_eq!(t.to, ResourceState::RenderTarget);
    }

    #[test]
    fn test_round_trip_is_two_barriers() {
        let mut state = ResourceState::Common;
        let mut barriers = 0;
        for target in [
            ResourceState::CopyDst,
            ResourceState::CopyDst,
            ResourceState::ShaderResource,
        ] {
            if let Some(t) = plan_transition(state, target) {
                state = t.to;
                barriers += 1;
            }
        }
        assert_eq!(barriers, 2);
        assert_eq!(state, ResourceState::ShaderResource);
    }
}
