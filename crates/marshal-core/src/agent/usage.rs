//! Usage accounting.
//!
//! Every orchestration stage (planning call, each delegated task, synthesis
//! call) yields a complete `UsageInfo` snapshot for its scope. Aggregation
//! sums token counts and non-null costs, and takes the maximum duration:
//! concurrent stages overlap in wall-clock time, so summing durations would
//! overstate elapsed time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Dollar cost if the provider reports one. A `None` from any stage is
    /// skipped during aggregation rather than poisoning the sum.
    pub cost: Option<f64>,
    pub duration_ms: u64,
}

impl UsageInfo {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            cost: None,
            duration_ms: 0,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Merge two snapshots: token sums, cost sums (skipping `None`),
    /// max duration.
    pub fn merge(&self, other: &UsageInfo) -> UsageInfo {
        UsageInfo {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            cost: match (self.cost, other.cost) {
                (Some(a), Some(b)) => Some(a + b),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            },
            duration_ms: self.duration_ms.max(other.duration_ms),
        }
    }

    pub fn merge_all<'a>(stages: impl IntoIterator<Item = &'a UsageInfo>) -> UsageInfo {
        stages
            .into_iter()
            .fold(UsageInfo::default(), |acc, u| acc.merge(u))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_tokens() {
        let a = UsageInfo::new(10, 5);
        let b = UsageInfo::new(3, 7);
        let merged = a.merge(&b);
        assert_eq!(merged.input_tokens, 13);
        assert_eq!(merged.output_tokens, 12);
        assert_eq!(merged.total_tokens, a.total_tokens + b.total_tokens);
    }

    #[test]
    fn merge_takes_max_duration() {
        let a = UsageInfo::new(1, 1).with_duration_ms(400);
        let b = UsageInfo::new(1, 1).with_duration_ms(900);
        assert_eq!(a.merge(&b).duration_ms, 900);
        assert_eq!(b.merge(&a).duration_ms, 900);
    }

    #[test]
    fn null_cost_does_not_poison_sum() {
        let a = UsageInfo::new(1, 1).with_cost(0.25);
        let b = UsageInfo::new(1, 1); // no cost reported
        let c = UsageInfo::new(1, 1).with_cost(0.5);
        let merged = UsageInfo::merge_all([&a, &b, &c]);
        assert_eq!(merged.cost, Some(0.75));

        let none = UsageInfo::new(1, 1).merge(&UsageInfo::new(2, 2));
        assert_eq!(none.cost, None);
    }

    #[test]
    fn merge_is_associative_and_commutative() {
        let a = UsageInfo::new(10, 2).with_cost(0.1).with_duration_ms(100);
        let b = UsageInfo::new(5, 8).with_duration_ms(300);
        let c = UsageInfo::new(7, 1).with_cost(0.3).with_duration_ms(200);

        let left = a.merge(&b).merge(&c);
        let right = a.merge(&b.merge(&c));
        assert_eq!(left, right);
        assert_eq!(a.merge(&b), b.merge(&a));
    }
}
