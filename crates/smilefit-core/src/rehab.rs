//! Focused rehabilitation metrics.
//!
//! Compares a series of expression captures against a neutral capture and
//! reports how much each facial muscle group moved. Distances are measured
//! on landmarks in normalized image coordinates (`[0, 1]`), the frame the
//! per-muscle maximum changes were measured in.

use crate::types::LandmarkSet;
use serde::{Deserialize, Serialize};

/// Stability tolerance for the buccinator's lip-gap check.
const STABLE_TOLERANCE: f64 = 0.01;

/// Fraction of a muscle's max change that counts as "activated".
const ACTIVATION_FRACTION: f64 = 0.2;

/// Scales the mean delta variance onto 0–100.
const CONSISTENCY_SCALE: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Muscle {
    FrontalisLeft,
    FrontalisRight,
    OrbicularisOculiLeft,
    OrbicularisOculiRight,
    Corrugator,
    LevatorLabii,
    ZygomaticusLeft,
    ZygomaticusRight,
    Pterygoid,
    Incisivus,
    Buccinator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Contraction lengthens the measured distance.
    Increase,
    /// Contraction shortens the measured distance.
    Decrease,
}

/// How one muscle is observed on the face mesh.
#[derive(Debug, Clone, Copy)]
pub struct MuscleRule {
    pub muscle: Muscle,
    pub landmarks: (usize, usize),
    pub direction: Direction,
    /// Largest expected change (normalized units); maps to 100%.
    pub max_change: f64,
    /// A pair that must stay still for the movement to count.
    pub stable: Option<(usize, usize)>,
}

pub static MUSCLE_RULES: [MuscleRule; 11] = [
    MuscleRule { muscle: Muscle::FrontalisRight, landmarks: (334, 386), direction: Direction::Increase, max_change: 0.136, stable: None },
    MuscleRule { muscle: Muscle::FrontalisLeft, landmarks: (105, 159), direction: Direction::Increase, max_change: 0.136, stable: None },
    MuscleRule { muscle: Muscle::OrbicularisOculiRight, landmarks: (386, 374), direction: Direction::Decrease, max_change: 0.047, stable: None },
    MuscleRule { muscle: Muscle::OrbicularisOculiLeft, landmarks: (159, 145), direction: Direction::Decrease, max_change: 0.047, stable: None },
    MuscleRule { muscle: Muscle::Corrugator, landmarks: (107, 336), direction: Direction::Decrease, max_change: 0.072, stable: None },
    MuscleRule { muscle: Muscle::LevatorLabii, landmarks: (285, 437), direction: Direction::Decrease, max_change: 0.143, stable: None },
    MuscleRule { muscle: Muscle::ZygomaticusRight, landmarks: (291, 446), direction: Direction::Decrease, max_change: 0.048, stable: None },
    MuscleRule { muscle: Muscle::ZygomaticusLeft, landmarks: (61, 226), direction: Direction::Decrease, max_change: 0.048, stable: None },
    MuscleRule { muscle: Muscle::Pterygoid, landmarks: (1, 152), direction: Direction::Increase, max_change: 0.09, stable: None },
    MuscleRule { muscle: Muscle::Incisivus, landmarks: (61, 291), direction: Direction::Decrease, max_change: 0.017, stable: None },
    MuscleRule { muscle: Muscle::Buccinator, landmarks: (61, 291), direction: Direction::Increase, max_change: 0.017, stable: Some((13, 14)) },
];

pub fn rule_for(muscle: Muscle) -> &'static MuscleRule {
    MUSCLE_RULES
        .iter()
        .find(|r| r.muscle == muscle)
        .unwrap_or(&MUSCLE_RULES[0])
}

/// Focused exercises and their left/right target muscles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exercise {
    EyebrowRaise,
    EyeClose,
    Smile,
}

impl Exercise {
    pub fn targets(self) -> (Muscle, Muscle) {
        match self {
            Exercise::EyebrowRaise => (Muscle::FrontalisLeft, Muscle::FrontalisRight),
            Exercise::EyeClose => (Muscle::OrbicularisOculiLeft, Muscle::OrbicularisOculiRight),
            Exercise::Smile => (Muscle::ZygomaticusLeft, Muscle::ZygomaticusRight),
        }
    }
}

/// Signed movement in the contraction direction, `None` if a landmark is missing.
fn movement(rule: &MuscleRule, neutral: &LandmarkSet, expression: &LandmarkSet) -> Option<f64> {
    let (a, b) = rule.landmarks;
    let diff = expression.distance(a, b)? - neutral.distance(a, b)?;
    Some(match rule.direction {
        Direction::Increase => diff,
        Direction::Decrease => -diff,
    })
}

fn is_stable(pair: (usize, usize), neutral: &LandmarkSet, expression: &LandmarkSet) -> bool {
    match (neutral.distance(pair.0, pair.1), expression.distance(pair.0, pair.1)) {
        (Some(base), Some(now)) => (now - base).abs() <= STABLE_TOLERANCE,
        _ => false,
    }
}

/// Mean usage of one muscle as a percentage of its max change.
///
/// Captures that moved the wrong way (or not at all) are ignored rather than
/// averaged in as zero.
pub fn muscle_usage_for(rule: &MuscleRule, neutral: &LandmarkSet, expressions: &[LandmarkSet]) -> u8 {
    let mut total = 0.0;
    let mut count = 0usize;

    for expression in expressions {
        let Some(diff) = movement(rule, neutral, expression) else {
            continue;
        };
        if diff <= 0.0 {
            continue;
        }
        if let Some(pair) = rule.stable {
            if !is_stable(pair, neutral, expression) {
                continue;
            }
        }
        total += (diff / rule.max_change).min(1.0);
        count += 1;
    }

    if count == 0 {
        0
    } else {
        (total / count as f64 * 100.0).round() as u8
    }
}

/// Usage percentage for every muscle, in rule order.
pub fn muscle_usage(neutral: &LandmarkSet, expressions: &[LandmarkSet]) -> Vec<(Muscle, u8)> {
    MUSCLE_RULES
        .iter()
        .map(|rule| (rule.muscle, muscle_usage_for(rule, neutral, expressions)))
        .collect()
}

/// The `n` most used muscles, highest first.
pub fn top_muscles(usage: &[(Muscle, u8)], n: usize) -> Vec<(Muscle, u8)> {
    let mut sorted = usage.to_vec();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    sorted.truncate(n);
    sorted
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symmetry {
    pub left: u8,
    pub right: u8,
    pub diff: u8,
}

pub fn symmetry(usage: &[(Muscle, u8)], exercise: Exercise) -> Symmetry {
    let (left_muscle, right_muscle) = exercise.targets();
    let lookup = |m: Muscle| {
        usage
            .iter()
            .find(|(muscle, _)| *muscle == m)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    };
    let left = lookup(left_muscle);
    let right = lookup(right_muscle);
    Symmetry {
        left,
        right,
        diff: left.abs_diff(right),
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// How steadily the target muscles were held across captures (0–100).
/// `None` without captures or when a target landmark is missing.
pub fn consistency(neutral: &LandmarkSet, expressions: &[LandmarkSet], exercise: Exercise) -> Option<u8> {
    if expressions.is_empty() {
        return None;
    }
    let (left, right) = exercise.targets();
    let deltas = |muscle: Muscle| -> Option<Vec<f64>> {
        let (a, b) = rule_for(muscle).landmarks;
        let base = neutral.distance(a, b)?;
        expressions
            .iter()
            .map(|e| e.distance(a, b).map(|d| d - base))
            .collect()
    };
    let avg = (variance(&deltas(left)?) + variance(&deltas(right)?)) / 2.0;
    let raw = (avg * CONSISTENCY_SCALE).min(100.0);
    Some((100.0 - raw).round() as u8)
}

/// Share of (capture, target muscle) pairs that moved past the activation
/// threshold, as a percentage.
pub fn activation_rate(neutral: &LandmarkSet, expressions: &[LandmarkSet], exercise: Exercise) -> u8 {
    if expressions.is_empty() {
        return 0;
    }
    let (left, right) = exercise.targets();
    let rules = [rule_for(left), rule_for(right)];
    let activated = expressions
        .iter()
        .flat_map(|e| rules.iter().map(move |r| (r, e)))
        .filter(|(rule, e)| {
            movement(rule, neutral, e).is_some_and(|d| d > rule.max_change * ACTIVATION_FRACTION)
        })
        .count();
    let attempts = expressions.len() * rules.len();
    (activated as f64 / attempts as f64 * 100.0).round() as u8
}

/// Index of the capture with the largest combined target movement.
pub fn best_capture(neutral: &LandmarkSet, expressions: &[LandmarkSet], exercise: Exercise) -> Option<usize> {
    let (left, right) = exercise.targets();
    let (left, right) = (rule_for(left), rule_for(right));
    expressions
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let l = movement(left, neutral, e).unwrap_or(0.0).max(0.0);
            let r = movement(right, neutral, e).unwrap_or(0.0).max(0.0);
            (i, l + r)
        })
        .fold(None, |best: Option<(usize, f64)>, (i, sum)| match best {
            Some((_, best_sum)) if best_sum >= sum => best,
            _ => Some((i, sum)),
        })
        .map(|(i, _)| i)
}

/// Coaching lines for a completed focused exercise.
pub fn rehab_feedback(symmetry_diff: u8, activation_rate: u8) -> Vec<&'static str> {
    let mut lines = vec!["You completed the focused exercise."];

    lines.push(match symmetry_diff {
        d if d < 15 => "Both sides worked evenly; your balance is good.",
        d if d < 30 => "There is a small left/right difference, but overall it was steady.",
        _ => "One side did more of the work. Try to move both sides equally.",
    });

    lines.push(match activation_rate {
        r if r >= 80 => "You engaged the target muscles very well.",
        r if r >= 50 => "The target muscles were used reasonably. Keep practicing.",
        _ => "The target muscles moved only a little. Focus on them next time.",
    });

    lines.push("Keep it up for the next exercise!");
    lines
}
