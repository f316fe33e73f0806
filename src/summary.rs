// src/summary.rs
// Post-session performance summary with mastery deltas and insights

use crate::config::MasteryConfig;
use crate::limits::expected_minutes;
use crate::mastery::is_mastered;
use crate::models::{Attempt, Difficulty, Session, SessionOrigin, SessionStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const SLOW_SOLVE_RATIO: f64 = 1.5;
const STRONG_ACCURACY: f64 = 0.8;
const WEAK_ACCURACY: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyMix {
    pub difficulty: Difficulty,
    pub attempted: u32,
    pub successful: u32,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryDelta {
    pub tag: String,
    pub attempts_before: u32,
    pub attempts_after: u32,
    pub success_rate_before: f64,
    pub success_rate_after: f64,
    pub newly_mastered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub origin: SessionOrigin,
    pub status: SessionStatus,
    pub total_attempts: u32,
    pub successful_attempts: u32,
    pub accuracy: f64,
    pub total_minutes: f64,
    pub average_minutes: f64,
    pub scheduled_problems: usize,
    pub attempted_problems: usize,
    pub difficulty_mix: Vec<DifficultyMix>,
    pub mastery_deltas: Vec<MasteryDelta>,
    pub insights: Vec<String>,
}

fn rate(successful: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64
    }
}

#[derive(Default)]
struct Tally {
    total: u32,
    successful: u32,
}

impl Tally {
    fn add(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.successful += 1;
        }
    }
}

/// Summarize `session` against the full attempt `history`.
///
/// Mastery deltas compare each touched tag before the session (history older
/// than the session, excluding its own attempts) with after it.
pub fn summarize(session: &Session, history: &[Attempt], config: &MasteryConfig) -> SessionSummary {
    let attempts = &session.attempts;
    let total = attempts.len() as u32;
    let successful = attempts.iter().filter(|a| a.success).count() as u32;
    let total_minutes: f64 = attempts.iter().map(|a| a.time_minutes).sum();

    let mut by_difficulty: BTreeMap<Difficulty, Tally> = BTreeMap::new();
    for a in attempts {
        by_difficulty.entry(a.difficulty).or_default().add(a.success);
    }
    let difficulty_mix: Vec<DifficultyMix> = by_difficulty
        .iter()
        .map(|(d, t)| DifficultyMix {
            difficulty: *d,
            attempted: t.total,
            successful: t.successful,
            accuracy: rate(t.successful, t.total),
        })
        .collect();

    let own: HashSet<&str> = attempts.iter().map(|a| a.id.as_str()).collect();
    let mut before: BTreeMap<&str, Tally> = BTreeMap::new();
    let mut during: BTreeMap<&str, Tally> = BTreeMap::new();
    for a in attempts {
        for tag in &a.tags {
            during.entry(tag.as_str()).or_default().add(a.success);
        }
    }
    for a in history
        .iter()
        .filter(|a| !own.contains(a.id.as_str()) && a.timestamp < session.created_at)
    {
        for tag in a.tags.iter().filter(|t| during.contains_key(t.as_str())) {
            before.entry(tag.as_str()).or_default().add(a.success);
        }
    }

    let mastery_deltas: Vec<MasteryDelta> = during
        .iter()
        .map(|(tag, d)| {
            let (b_total, b_ok) = before
                .get(tag)
                .map(|b| (b.total, b.successful))
                .unwrap_or((0, 0));
            let (a_total, a_ok) = (b_total + d.total, b_ok + d.successful);
            let rate_before = rate(b_ok, b_total);
            let rate_after = rate(a_ok, a_total);
            MasteryDelta {
                tag: tag.to_string(),
                attempts_before: b_total,
                attempts_after: a_total,
                success_rate_before: rate_before,
                success_rate_after: rate_after,
                newly_mastered: !is_mastered(b_total, rate_before, config)
                    && is_mastered(a_total, rate_after, config),
            }
        })
        .collect();

    let insights = build_insights(attempts, &difficulty_mix, &mastery_deltas, &during);

    SessionSummary {
        session_id: session.id.clone(),
        origin: session.origin,
        status: session.status,
        total_attempts: total,
        successful_attempts: successful,
        accuracy: rate(successful, total),
        total_minutes,
        average_minutes: if total == 0 { 0.0 } else { total_minutes / total as f64 },
        scheduled_problems: session.problems.len(),
        attempted_problems: session.attempted_slots(),
        difficulty_mix,
        mastery_deltas,
        insights,
    }
}

fn build_insights(
    attempts: &[Attempt],
    mix: &[DifficultyMix],
    deltas: &[MasteryDelta],
    during: &BTreeMap<&str, Tally>,
) -> Vec<String> {
    let mut out = Vec::new();
    if attempts.is_empty() {
        out.push("No attempts were recorded in this session".to_string());
        return out;
    }

    for m in mix.iter().filter(|m| m.attempted >= 2) {
        if m.accuracy >= STRONG_ACCURACY {
            out.push(format!(
                "{} problems are going well ({}/{} solved)",
                m.difficulty, m.successful, m.attempted
            ));
        } else if m.accuracy < WEAK_ACCURACY {
            out.push(format!(
                "{} problems are a weak spot ({}/{} solved)",
                m.difficulty, m.successful, m.attempted
            ));
        }
    }

    let slow = attempts
        .iter()
        .filter(|a| a.success && a.time_minutes > expected_minutes(a.difficulty) * SLOW_SOLVE_RATIO)
        .count();
    if slow > 0 {
        out.push(format!("{} solve(s) ran well over the expected time", slow));
    }

    for d in deltas.iter().filter(|d| d.newly_mastered) {
        out.push(format!("Mastered '{}'", d.tag));
    }

    for (tag, t) in during {
        if t.total >= 2 && rate(t.successful, t.total) < WEAK_ACCURACY {
            out.push(format!(
                "Struggling with '{}' ({}/{} solved)",
                tag, t.successful, t.total
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn attempt(id: &str, difficulty: Difficulty, tags: &[&str], success: bool, minutes: f64, age_min: i64) -> Attempt {
        Attempt {
            id: id.into(),
            problem_id: 1,
            problem_slug: String::new(),
            session_id: "s".into(),
            success,
            time_minutes: minutes,
            timestamp: Utc::now() - Duration::minutes(age_min),
            perceived_difficulty: None,
            difficulty,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_session() {
        let session = Session::new_tracking(Utc::now());
        let summary = summarize(&session, &[], &MasteryConfig::default());
        assert_eq!(summary.total_attempts, 0);
        assert_eq!(summary.accuracy, 0.0);
        assert_eq!(summary.insights.len(), 1);
    }

    #[test]
    fn test_mix_deltas_and_insights() {
        let mut session = Session::new_tracking(Utc::now() - Duration::minutes(60));
        session.attempts = vec![
            attempt("s1", Difficulty::Easy, &["stack"], true, 5.0, 50),
            attempt("s2", Difficulty::Easy, &["stack"], true, 20.0, 40),
            attempt("s3", Difficulty::Medium, &["graph"], false, 30.0, 30),
            attempt("s4", Difficulty::Medium, &["graph"], false, 30.0, 20),
        ];
        let mut history: Vec<Attempt> = (0..3)
            .map(|n| attempt(&format!("h{}", n), Difficulty::Easy, &["stack"], true, 8.0, 1000 + n))
            .collect();
        history.extend(session.attempts.iter().cloned());

        let summary = summarize(&session, &history, &MasteryConfig::default());
        assert_eq!(summary.total_attempts, 4);
        assert_eq!(summary.successful_attempts, 2);
        assert!((summary.average_minutes - 21.25).abs() < 1e-9);
        assert_eq!(summary.difficulty_mix.len(), 2);

        let stack = summary.mastery_deltas.iter().find(|d| d.tag == "stack").unwrap();
        assert_eq!(stack.attempts_before, 3);
        assert_eq!(stack.attempts_after, 5);
        assert!(stack.newly_mastered);

        let graph = summary.mastery_deltas.iter().find(|d| d.tag == "graph").unwrap();
        assert_eq!(graph.attempts_before, 0);
        assert!(!graph.newly_mastered);

        let text = summary.insights.join("\n");
        assert!(text.contains("Easy problems are going well"));
        assert!(text.contains("Medium problems are a weak spot"));
        assert!(text.contains("1 solve(s) ran well over"));
        assert!(text.contains("Mastered 'stack'"));
        assert!(text.contains("Struggling with 'graph'"));
    }
}
