use crate::models::plan::plan_limit;

/// Whether a user on `plan_name` who already owns `current_count` syncs may
/// create another one.
///
/// Pure lookup against the plan table. Unknown plans have a limit of zero,
/// so they never allow creation.
pub fn can_create(plan_name: &str, current_count: i64) -> bool {
    plan_limit(plan_name).allows(current_count)
}
