use std::collections::BTreeMap;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::config::PlansConfig;

/// Limits an account's plan puts on checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRules {
    pub max_domains: usize,
    pub check_interval_secs: u64,
    pub ssl_check: bool,
}

impl PlanRules {
    /// Saturates at `TimeDelta::MAX` for intervals chrono cannot represent.
    pub fn check_interval(&self) -> TimeDelta {
        i64::try_from(self.check_interval_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

/// Source of plan rules for an account's plan slug
pub trait PlanResolver: Send + Sync {
    fn resolve(&self, plan: &str) -> PlanRules;
}

/// Rules from the `[plans]` config section; unknown slugs get the default plan.
pub struct ConfigPlanResolver {
    rules: BTreeMap<String, PlanRules>,
    fallback: PlanRules,
}

impl ConfigPlanResolver {
    pub fn new(config: &PlansConfig) -> Self {
        let fallback = config.rules.get(&config.default_plan).copied().unwrap_or(PlanRules {
            max_domains: 50,
            check_interval_secs: 3600,
            ssl_check: false,
        });
        Self { rules: config.rules.clone(), fallback }
    }
}

impl PlanResolver for ConfigPlanResolver {
    fn resolve(&self, plan: &str) -> PlanRules {
        match self.rules.get(plan) {
            Some(rules) => *rules,
            None => {
                tracing::debug!(plan, "unknown plan, using default rules");
                self.fallback
            }
        }
    }
}
