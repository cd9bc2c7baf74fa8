use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// XP required to go from level 1 to level 2. Each level-up raises the
/// requirement by 20%, rounded down.
pub const BASE_XP_TO_NEXT_LEVEL: u32 = 100;

/// Gamification profile, one document per user, keyed by the JWT subject.
/// Created lazily with defaults on first read or mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "_id")]
    pub user_id: String,
    pub level: u32,
    pub xp: u32,
    pub xp_to_next_level: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
    pub total_quizzes_taken: u32,
    pub total_quizzes_created: u32,
    pub total_correct_answers: u32,
    pub total_questions_answered: u32,
    /// Optimistic-concurrency stamp, bumped by the store on every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of `update_streak` for a single day of activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakChange {
    /// First recorded activity ever.
    Started,
    /// Consecutive day, streak grew by one.
    Extended,
    /// Repeat activity on the same day.
    Unchanged,
    /// Gap of more than one day; carries the length of the broken streak.
    Reset { broken: u32 },
    /// `today` is before the recorded last activity date. Nothing is mutated;
    /// callers log this for review.
    ClockSkew,
}

impl StreakChange {
    pub fn lost(&self) -> bool {
        matches!(self, StreakChange::Reset { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreakChange::Started => "started",
            StreakChange::Extended => "extended",
            StreakChange::Unchanged => "unchanged",
            StreakChange::Reset { .. } => "reset",
            StreakChange::ClockSkew => "clock_skew",
        }
    }
}

/// Outcome of an XP grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProgress {
    pub levels_gained: u32,
}

impl Profile {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Profile {
            user_id: user_id.to_string(),
            level: 1,
            xp: 0,
            xp_to_next_level: BASE_XP_TO_NEXT_LEVEL,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            total_quizzes_taken: 0,
            total_quizzes_created: 0,
            total_correct_answers: 0,
            total_questions_answered: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add XP and resolve level-up cascades. Overflow is always carried into
    /// levels, so `xp < xp_to_next_level` holds afterwards. Pure in-memory
    /// mutation; the caller persists once the whole pipeline has run.
    pub fn add_xp(&mut self, amount: u32) -> LevelProgress {
        self.xp = self.xp.saturating_add(amount);
        let mut levels_gained = 0;
        while self.xp >= self.xp_to_next_level {
            self.xp -= self.xp_to_next_level;
            self.level += 1;
            levels_gained += 1;
            self.xp_to_next_level = next_level_requirement(self.xp_to_next_level);
        }
        LevelProgress { levels_gained }
    }

    /// Apply a day of quiz activity to the streak. Called only after a
    /// counted attempt completes; this is the only place a streak grows.
    pub fn update_streak(&mut self, today: NaiveDate) -> StreakChange {
        let change = match self.last_activity_date {
            None => {
                self.current_streak = 1;
                StreakChange::Started
            }
            Some(last) => match (today - last).num_days() {
                0 => StreakChange::Unchanged,
                1 => {
                    self.current_streak += 1;
                    StreakChange::Extended
                }
                d if d > 1 => {
                    let broken = self.current_streak;
                    self.current_streak = 1;
                    StreakChange::Reset { broken }
                }
                // today before last activity: leave all streak state alone.
                _ => return StreakChange::ClockSkew,
            },
        };
        if self.current_streak > self.longest_streak {
            self.longest_streak = self.current_streak;
        }
        self.last_activity_date = Some(today);
        change
    }

    /// Lazily decay a lapsed streak on profile read. Returns true when the
    /// streak was zeroed and the profile needs persisting.
    pub fn check_streak(&mut self, today: NaiveDate) -> bool {
        match self.last_activity_date {
            Some(last) if (today - last).num_days() > 1 && self.current_streak > 0 => {
                self.current_streak = 0;
                true
            }
            _ => false,
        }
    }

    /// Lifetime answer accuracy in percent, rounded to one decimal.
    pub fn accuracy(&self) -> f64 {
        if self.total_questions_answered == 0 {
            return 0.0;
        }
        let pct = self.total_correct_answers as f64 / self.total_questions_answered as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }
}

/// floor(n * 1.2) in integer arithmetic.
fn next_level_requirement(current: u32) -> u32 {
    ((current as u64 * 12) / 10).min(u32::MAX as u64) as u32
}
