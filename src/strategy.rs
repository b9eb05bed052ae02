//! Hunger strategies built on the resource hierarchy protocol.
//!
//! Every strategy here acquires the lower fork id first, so the wait-for
//! graph between workers stays acyclic and the table cannot deadlock.
//! Fairness experiments differ only in timing, expressed as a [`DelayPlan`]:
//! how long a philosopher waits before reaching for forks, how long it holds
//! both while eating, and how long it thinks after putting them down.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::philosopher::{pause, HungerStrategy, PhilosopherId, Seat};

/// Delay chosen per philosopher identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DelayRule {
    #[default]
    None,
    /// Same delay for everyone
    Fixed { ms: u64 },
    /// `id * step_ms`
    PerId { step_ms: u64 },
    /// Even and odd identities get different delays
    Parity { even_ms: u64, odd_ms: u64 },
    /// Only one philosopher is delayed
    Only { philosopher: usize, ms: u64 },
    /// Uniformly random in `0..=max_ms`, drawn per cycle
    Jitter { max_ms: u64 },
}

impl DelayRule {
    pub fn delay_for(&self, id: PhilosopherId) -> Duration {
        let ms = match *self {
            DelayRule::None => 0,
            DelayRule::Fixed { ms } => ms,
            DelayRule::PerId { step_ms } => step_ms.saturating_mul(id.0 as u64),
            DelayRule::Parity { even_ms, odd_ms } => {
                if id.0 % 2 == 0 {
                    even_ms
                } else {
                    odd_ms
                }
            }
            DelayRule::Only { philosopher, ms } => {
                if id.0 == philosopher {
                    ms
                } else {
                    0
                }
            }
            DelayRule::Jitter { max_ms } => {
                if max_ms == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=max_ms)
                }
            }
        };
        Duration::from_millis(ms)
    }

    /// True when the rule can never produce a non-zero delay.
    pub fn is_none(&self) -> bool {
        match *self {
            DelayRule::None => true,
            DelayRule::Fixed { ms } | DelayRule::Only { ms, .. } => ms == 0,
            DelayRule::PerId { step_ms } => step_ms == 0,
            DelayRule::Parity { even_ms, odd_ms } => even_ms == 0 && odd_ms == 0,
            DelayRule::Jitter { max_ms } => max_ms == 0,
        }
    }
}

/// Timing perturbation applied around the ordered acquire/eat/release cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DelayPlan {
    /// While hungry, before reaching for the first fork
    #[serde(default)]
    pub pre_acquire: DelayRule,
    /// While holding both forks, before the meal is counted
    #[serde(default)]
    pub eating: DelayRule,
    /// After both forks are down
    #[serde(default)]
    pub post_eat: DelayRule,
}

impl DelayPlan {
    pub fn pre_acquire(mut self, rule: DelayRule) -> Self {
        self.pre_acquire = rule;
        self
    }

    pub fn eating(mut self, rule: DelayRule) -> Self {
        self.eating = rule;
        self
    }

    pub fn post_eat(mut self, rule: DelayRule) -> Self {
        self.post_eat = rule;
        self
    }

    pub fn is_idle(&self) -> bool {
        self.pre_acquire.is_none() && self.eating.is_none() && self.post_eat.is_none()
    }
}

/// Resource hierarchy strategy: lower fork id first, timing from a plan.
#[derive(Debug, Clone, Default)]
pub struct OrderedStrategy {
    plan: DelayPlan,
}

impl OrderedStrategy {
    pub fn new(plan: DelayPlan) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &DelayPlan {
        &self.plan
    }
}

impl HungerStrategy for OrderedStrategy {
    fn on_hungry(&self, seat: &Seat<'_>) -> Result<(), TableError> {
        let id = seat.id();
        pause(self.plan.pre_acquire.delay_for(id));
        seat.eat_ordered(self.plan.eating.delay_for(id))?;
        pause(self.plan.post_eat.delay_for(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fork::{DefaultFork, ForkId};
    use crate::philosopher::Philosopher;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_delay_rules_keyed_by_identity() {
        let even = PhilosopherId(2);
        let odd = PhilosopherId(3);

        assert_eq!(DelayRule::None.delay_for(even), Duration::ZERO);
        assert_eq!(
            DelayRule::Fixed { ms: 5 }.delay_for(odd),
            Duration::from_millis(5)
        );
        assert_eq!(
            DelayRule::PerId { step_ms: 20 }.delay_for(odd),
            Duration::from_millis(60)
        );

        let parity = DelayRule::Parity {
            even_ms: 50,
            odd_ms: 0,
        };
        assert_eq!(parity.delay_for(even), Duration::from_millis(50));
        assert_eq!(parity.delay_for(odd), Duration::ZERO);

        let only = DelayRule::Only {
            philosopher: 0,
            ms: 1000,
        };
        assert_eq!(only.delay_for(PhilosopherId(0)), Duration::from_millis(1000));
        assert_eq!(only.delay_for(odd), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let rule = DelayRule::Jitter { max_ms: 3 };
        for _ in 0..100 {
            assert!(rule.delay_for(PhilosopherId(1)) <= Duration::from_millis(3));
        }
        assert!(!rule.is_none());
        assert!(DelayRule::Jitter { max_ms: 0 }.is_none());
    }

    #[test]
    fn test_plan_builder_and_idle() {
        assert!(DelayPlan::default().is_idle());
        let plan = DelayPlan::default().post_eat(DelayRule::Parity {
            even_ms: 10,
            odd_ms: 100,
        });
        assert!(!plan.is_idle());
        assert!(plan.pre_acquire.is_none());
    }

    #[test]
    fn test_plan_json_uses_rule_tags() {
        let json = r#"{"eating": {"rule": "only", "philosopher": 0, "ms": 1000}}"#;
        let plan: DelayPlan = serde_json::from_str(json).unwrap();
        assert_eq!(
            plan.eating,
            DelayRule::Only {
                philosopher: 0,
                ms: 1000
            }
        );
        assert_eq!(plan.pre_acquire, DelayRule::None);
    }

    #[test]
    fn test_ordered_strategy_applies_eating_delay() {
        let strategy = OrderedStrategy::new(
            DelayPlan::default().eating(DelayRule::Fixed { ms: 15 }),
        );
        let philosopher = Philosopher::with_strategy(PhilosopherId(0), Arc::new(strategy));
        let left = DefaultFork::new(ForkId(0));
        let right = DefaultFork::new(ForkId(1));

        let start = Instant::now();
        philosopher.on_hungry(&left, &right).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(philosopher.meals(), 1);
    }
}
