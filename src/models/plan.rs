use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::fmt;
use std::str::FromStr;

/// Raw form of [`PlanLimit::Unlimited`] in API responses.
pub const UNLIMITED_SENTINEL: i64 = -1;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    #[default]
    Free,
    Starter,
    Pro,
    Business,
}

impl PlanType {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Starter => "starter",
            PlanType::Pro => "pro",
            PlanType::Business => "business",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanType::Free),
            "starter" => Ok(PlanType::Starter),
            "pro" => Ok(PlanType::Pro),
            "business" => Ok(PlanType::Business),
            other => Err(format!("unknown plan: {other}")),
        }
    }
}

/// Maximum number of syncs a plan may own.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlanLimit {
    Limited(i64),
    Unlimited,
}

impl PlanLimit {
    pub fn as_raw(self) -> i64 {
        match self {
            PlanLimit::Limited(max) => max,
            PlanLimit::Unlimited => UNLIMITED_SENTINEL,
        }
    }

    pub fn allows(self, current_count: i64) -> bool {
        match self {
            PlanLimit::Unlimited => true,
            PlanLimit::Limited(max) => current_count < max,
        }
    }
}

impl PlanType {
    pub fn limit(self) -> PlanLimit {
        match self {
            PlanType::Free => PlanLimit::Limited(1),
            PlanType::Starter => PlanLimit::Limited(3),
            PlanType::Pro => PlanLimit::Limited(10),
            PlanType::Business => PlanLimit::Unlimited,
        }
    }
}

/// Limit for a plan name as stored on the user row.
///
/// Names outside the plan table get `Limited(0)`: an account on a plan we
/// don't know about cannot create syncs.
pub fn plan_limit(plan_name: &str) -> PlanLimit {
    match plan_name.parse::<PlanType>() {
        Ok(plan) => plan.limit(),
        Err(_) => PlanLimit::Limited(0),
    }
}
