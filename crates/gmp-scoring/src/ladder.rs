//! Breakpoint ladders: map a continuous measurement onto a discrete score.

use serde::{Deserialize, Serialize};

use crate::ScoringError;

/// How a value is compared against each breakpoint; the first hit wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderRule {
    AtMost,
    Below,
    Above,
    AtLeast,
}

impl LadderRule {
    fn hits(self, value: f64, breakpoint: f64) -> bool {
        match self {
            LadderRule::AtMost => value <= breakpoint,
            LadderRule::Below => value < breakpoint,
            LadderRule::Above => value > breakpoint,
            LadderRule::AtLeast => value >= breakpoint,
        }
    }

    fn ascending(self) -> bool {
        matches!(self, LadderRule::AtMost | LadderRule::Below)
    }
}

/// `scores` has one more entry than `breakpoints`; the last is the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ladder<S = i64> {
    pub breakpoints: Vec<f64>,
    pub scores: Vec<S>,
}

impl<S: Copy> Ladder<S> {
    pub fn new(breakpoints: Vec<f64>, scores: Vec<S>) -> Self {
        Self {
            breakpoints,
            scores,
        }
    }

    pub fn validate(&self, name: &str, rule: LadderRule) -> Result<(), ScoringError> {
        if self.scores.len() != self.breakpoints.len() + 1 {
            return Err(ScoringError::InvalidConfig(format!(
                "{name}: expected {} scores for {} breakpoints, got {}",
                self.breakpoints.len() + 1,
                self.breakpoints.len(),
                self.scores.len()
            )));
        }
        let ordered = self.breakpoints.windows(2).all(|w| {
            if rule.ascending() {
                w[0] < w[1]
            } else {
                w[0] > w[1]
            }
        });
        if !ordered {
            let direction = if rule.ascending() { "ascending" } else { "descending" };
            return Err(ScoringError::InvalidConfig(format!(
                "{name}: breakpoints must be strictly {direction}"
            )));
        }
        Ok(())
    }

    pub fn score(&self, value: f64, rule: LadderRule) -> S {
        self.breakpoints
            .iter()
            .zip(&self.scores)
            .find(|(bp, _)| rule.hits(value, **bp))
            .map(|(_, score)| *score)
            .unwrap_or_else(|| self.scores[self.scores.len() - 1])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
    pub score: i64,
}

/// First band containing `value`, half-open on the upper edge.
pub fn band_score_half_open(bands: &[Band], value: f64) -> i64 {
    bands
        .iter()
        .find(|b| b.min <= value && value < b.max)
        .map_or(0, |b| b.score)
}

/// First band containing `value`, inclusive on both edges.
pub fn band_score_inclusive(bands: &[Band], value: f64) -> i64 {
    bands
        .iter()
        .find(|b| b.min <= value && value <= b.max)
        .map_or(0, |b| b.score)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductionStep {
    pub limit: f64,
    pub deduction: i64,
}

pub fn deduction_at_most(steps: &[DeductionStep], value: f64) -> i64 {
    steps
        .iter()
        .find(|s| value <= s.limit)
        .or_else(|| steps.last())
        .map_or(0, |s| s.deduction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_ladder_uses_floor_past_last_breakpoint() {
        let ladder = Ladder::new(vec![10.0, 20.0, 30.0, 50.0], vec![35, 30, 20, 10, 0]);
        assert_eq!(ladder.score(0.0, LadderRule::AtMost), 35);
        assert_eq!(ladder.score(10.0, LadderRule::AtMost), 35);
        assert_eq!(ladder.score(10.1, LadderRule::AtMost), 30);
        assert_eq!(ladder.score(50.0, LadderRule::AtMost), 10);
        assert_eq!(ladder.score(99.0, LadderRule::AtMost), 0);
    }

    #[test]
    fn descending_rules() {
        let gap = Ladder::new(vec![800.0, 500.0, 200.0], vec![50, 40, 20, 10]);
        assert_eq!(gap.score(900.0, LadderRule::Above), 50);
        assert_eq!(gap.score(800.0, LadderRule::Above), 40);
        assert_eq!(gap.score(100.0, LadderRule::Above), 10);

        let vis = Ladder::new(vec![30.0, 15.0, 5.0], vec![25, 20, 10, 5]);
        assert_eq!(vis.score(30.0, LadderRule::AtLeast), 25);
        assert_eq!(vis.score(4.9, LadderRule::AtLeast), 5);
    }

    #[test]
    fn validation_rejects_mismatched_or_unordered() {
        let short = Ladder::new(vec![10.0, 20.0], vec![5, 3]);
        assert!(short.validate("short", LadderRule::AtMost).is_err());
        let unordered = Ladder::new(vec![20.0, 10.0], vec![5, 3, 1]);
        assert!(unordered.validate("unordered", LadderRule::AtMost).is_err());
        assert!(unordered.validate("unordered", LadderRule::Above).is_ok());
    }

    #[test]
    fn bands_and_deductions() {
        let temps = vec![
            Band { min: -5.0, max: 0.0, score: 40 },
            Band { min: -10.0, max: -5.0, score: 30 },
        ];
        assert_eq!(band_score_half_open(&temps, -5.0), 40);
        assert_eq!(band_score_half_open(&temps, 0.0), 0);
        assert_eq!(band_score_inclusive(&temps, 0.0), 40);

        let age = vec![
            DeductionStep { limit: 3.0, deduction: 0 },
            DeductionStep { limit: 8.0, deduction: 2 },
        ];
        assert_eq!(deduction_at_most(&age, 2.0), 0);
        assert_eq!(deduction_at_most(&age, 5.0), 2);
        assert_eq!(deduction_at_most(&age, f64::INFINITY), 2);
    }
}
