// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// --- Enumerations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy = 1,
    Medium = 2,
    Hard = 3,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification tier of a tag. Ordering follows rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Core = 1,
    Fundamental = 2,
    Advanced = 3,
}

impl Tier {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Every tier at or below this one.
    pub fn allowed(&self) -> Vec<Tier> {
        [Tier::Core, Tier::Fundamental, Tier::Advanced]
            .into_iter()
            .filter(|t| t.rank() <= self.rank())
            .collect()
    }

    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Core => Some(Tier::Fundamental),
            Tier::Fundamental => Some(Tier::Advanced),
            Tier::Advanced => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Core => "core",
            Tier::Fundamental => "fundamental",
            Tier::Advanced => "advanced",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Draft,
    InProgress,
    Completed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Draft => "draft",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    Guided,
    Tracking,
}

impl SessionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOrigin::Guided => "guided",
            SessionOrigin::Tracking => "tracking",
        }
    }
}

/// Kind of guided session a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Standard,
    Review,
}

// --- Problem ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptStats {
    pub total: u32,
    pub successful: u32,
    pub unsuccessful: u32,
}

impl AttemptStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }
}

/// Scheduler-owned review state of a practice item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub box_level: u32,
    pub stability: f64,
    pub consecutive_failures: u32,
    pub stats: AttemptStats,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_review_at: Option<DateTime<Utc>>,
}

impl Problem {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Never-attempted problems are always eligible.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_review_at {
            Some(due) => due <= now,
            None => true,
        }
    }
}

// --- Attempt ---

/// Immutable record of one solve event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub problem_id: i64,
    pub problem_slug: String,
    pub session_id: String,
    pub success: bool,
    pub time_minutes: f64,
    pub timestamp: DateTime<Utc>,
    /// Self-reported difficulty, 1 (trivial) to 5 (brutal).
    pub perceived_difficulty: Option<u8>,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
}

/// What a caller submits when a problem is solved or abandoned.
///
/// Either identifier may be supplied; both are checked when matching a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttemptInput {
    pub problem_id: Option<i64>,
    pub slug: Option<String>,
    pub success: bool,
    pub time_minutes: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub perceived_difficulty: Option<u8>,
}

impl AttemptInput {
    pub fn describe(&self) -> String {
        match (self.problem_id, self.slug.as_deref()) {
            (Some(id), _) => id.to_string(),
            (None, Some(slug)) => slug.to_string(),
            (None, None) => "<unidentified>".to_string(),
        }
    }
}

// --- Session ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    Inactivity,
    SoftCap,
    DayChanged,
    TopicDrift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum CloseReason {
    AllProblemsAttempted,
    Rotated(RotationReason),
    AutoCompleted,
    ReplacedBySweep,
    Expired,
}

/// A pre-scheduled slot in a guided session. The slot list never changes;
/// only `outcome` is filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProblem {
    pub problem_id: i64,
    pub slug: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub selection: SelectionReason,
    pub outcome: Option<SlotOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    Review,
    PrimaryFocus,
    Expansion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotOutcome {
    pub attempt_id: String,
    pub success: bool,
}

impl SessionProblem {
    pub fn matches(&self, problem_id: i64, slug: &str) -> bool {
        self.problem_id == problem_id || (!slug.is_empty() && self.slug.eq_ignore_ascii_case(slug))
    }

    pub fn matches_attempt(&self, attempt: &Attempt) -> bool {
        self.matches(attempt.problem_id, &attempt.problem_slug)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetadata {
    pub close_reason: Option<CloseReason>,
    pub rotated_into: Option<String>,
    pub replacement_requested: bool,
    pub refresh_requested: bool,
    pub awaiting_user_choice: bool,
    /// Focus tags recommended at the moment the session closed.
    pub focus_snapshot: Vec<String>,
    pub notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub origin: SessionOrigin,
    pub session_type: Option<SessionType>,
    pub status: SessionStatus,
    pub problems: Vec<SessionProblem>,
    pub attempts: Vec<Attempt>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl Session {
    pub fn new_guided(
        session_type: SessionType,
        problems: Vec<SessionProblem>,
        now: DateTime<Utc>,
    ) -> Self {
        Session {
            id: uuid::Uuid::new_v4().to_string(),
            origin: SessionOrigin::Guided,
            session_type: Some(session_type),
            status: SessionStatus::Draft,
            problems,
            attempts: Vec::new(),
            created_at: now,
            last_activity_at: now,
            completed_at: None,
            metadata: SessionMetadata::default(),
        }
    }

    pub fn new_tracking(now: DateTime<Utc>) -> Self {
        Session {
            id: uuid::Uuid::new_v4().to_string(),
            origin: SessionOrigin::Tracking,
            session_type: None,
            status: SessionStatus::InProgress,
            problems: Vec::new(),
            attempts: Vec::new(),
            created_at: now,
            last_activity_at: now,
            completed_at: None,
            metadata: SessionMetadata::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_scheduled(&self, problem_id: i64, slug: &str) -> bool {
        self.problems.iter().any(|p| p.matches(problem_id, slug))
    }

    pub fn attempted_slots(&self) -> usize {
        self.problems
            .iter()
            .filter(|p| self.attempts.iter().any(|a| p.matches_attempt(a)))
            .count()
    }

    /// Every scheduled slot has a matching attempt. Empty sessions never qualify.
    pub fn all_problems_attempted(&self) -> bool {
        !self.problems.is_empty() && self.attempted_slots() == self.problems.len()
    }

    pub fn progress_ratio(&self) -> f64 {
        if self.problems.is_empty() {
            0.0
        } else {
            self.attempted_slots() as f64 / self.problems.len() as f64
        }
    }

    pub fn distinct_tags(&self) -> BTreeSet<String> {
        self.attempts
            .iter()
            .flat_map(|a| a.tags.iter().cloned())
            .collect()
    }

    pub fn close(&mut self, status: SessionStatus, reason: CloseReason, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        self.metadata.close_reason = Some(reason);
    }
}

// --- Tag Mastery ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyAllowance {
    pub easy: f64,
    pub medium: f64,
    pub hard: f64,
}

impl DifficultyAllowance {
    pub const CONSERVATIVE: DifficultyAllowance = DifficultyAllowance {
        easy: 1.0,
        medium: 1.0,
        hard: 0.0,
    };

    pub fn weight(&self, difficulty: Difficulty) -> f64 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }

    pub fn permits(&self, difficulty: Difficulty) -> bool {
        self.weight(difficulty) > 0.0
    }
}

impl Default for DifficultyAllowance {
    fn default() -> Self {
        Self::CONSERVATIVE
    }
}

/// Aggregate per-tag state, recomputed wholesale from attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMastery {
    pub tag: String,
    pub tier: Tier,
    pub total_attempts: u32,
    pub successful_attempts: u32,
    pub recent_success_rate: f64,
    pub decay_score: f64,
    pub mastered: bool,
    pub mastered_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub allowance: DifficultyAllowance,
    /// Ranked candidate problem ids.
    pub ladder: Vec<i64>,
}

impl TagMastery {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_attempts as f64 / self.total_attempts as f64
        }
    }
}

// --- Focus ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Onboarding,
    Developing,
    Good,
    Excellent,
    Stagnant,
}

impl PerformanceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceLevel::Onboarding => "onboarding",
            PerformanceLevel::Developing => "developing",
            PerformanceLevel::Good => "good",
            PerformanceLevel::Excellent => "excellent",
            PerformanceLevel::Stagnant => "stagnant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusDecision {
    pub active_tags: Vec<String>,
    pub algorithm_tags: Vec<String>,
    pub user_preferences: Vec<String>,
    pub reasoning: String,
    pub performance_level: PerformanceLevel,
}

// --- Persistent scheduler state ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub current_tier: Tier,
    /// Set by the tier-progression check; consumed by the next focus decision.
    pub pending_graduation: bool,
    pub last_mastery_progress_at: Option<DateTime<Utc>>,
    pub last_focus: Vec<String>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        SchedulerState {
            current_tier: Tier::Core,
            pending_graduation: false,
            last_mastery_progress_at: None,
            last_focus: Vec::new(),
        }
    }
}
