// SPDX-License-Identifier: MIT OR Apache-2.0
//! Id-range helpers shared between action definitions and the action registry.

/// Built-in action ids start here; the user id range sits strictly below it.
pub const BUILTIN_ACTION_ID_FLOOR: i64 = 9_000_000_000;

/// Returns `true` if `id` falls in the reserved built-in action range.
#[must_use]
pub fn is_builtin_action_id(id: i64) -> bool {
    id >= BUILTIN_ACTION_ID_FLOOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_is_builtin() {
        assert!(is_builtin_action_id(BUILTIN_ACTION_ID_FLOOR));
    }

    #[test]
    fn below_floor_is_user_range() {
        assert!(!is_builtin_action_id(BUILTIN_ACTION_ID_FLOOR - 1));
        assert!(!is_builtin_action_id(1));
    }
}
