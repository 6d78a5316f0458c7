// 🎓 Education - Course catalogue and enrollment progression
//
// Per-player state machine:
//   NotEnrolled → Enrolled(course) → Completed(course) → NotEnrolled
//
// The catalogue is injected and immutable. Completion side effects (skills,
// careers, income) go through `CompletionHooks` so game systems can plug in
// without touching this module.

use crate::clock::{add_months, days_between, Clock};
use crate::error::GameError;
use crate::money::{format_gold, Gold};
use crate::player::{Enrollment, Player, SocialClass};
use anyhow::{bail, Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const FLORENTINE_COURSES: &str = include_str!("../data/courses.json");

// ============================================================================
// COURSE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    /// Unique title, doubles as the course id
    pub title: String,

    #[serde(default)]
    pub description: String,

    pub available_to: BTreeSet<SocialClass>,

    #[serde(default)]
    pub prerequisites: BTreeSet<String>,

    pub cost: Gold,

    pub duration_months: u32,

    /// Skill points granted on completion (used by `CourseRewards`)
    #[serde(default)]
    pub skills: BTreeMap<String, u32>,

    /// Careers/opportunities unlocked on completion (used by `CourseRewards`)
    #[serde(default)]
    pub unlocks: Vec<String>,
}

impl Course {
    pub fn id(&self) -> &str {
        &self.title
    }

    pub fn is_open_to(&self, class: SocialClass) -> bool {
        self.available_to.contains(&class)
    }

    /// Prerequisites the player has not completed, sorted by title
    pub fn missing_prerequisites(&self, player: &Player) -> Vec<String> {
        self.prerequisites
            .iter()
            .filter(|prereq| !player.has_completed(prereq))
            .cloned()
            .collect()
    }

    pub fn is_available_to(&self, player: &Player) -> bool {
        self.is_open_to(player.social_class) && self.missing_prerequisites(player).is_empty()
    }
}

// ============================================================================
// CATALOGUE
// ============================================================================

/// Immutable list of courses, in presentation order
#[derive(Debug, Clone, PartialEq)]
pub struct CourseCatalogue {
    courses: Vec<Course>,
}

impl CourseCatalogue {
    /// Build from a list; titles must be unique and prerequisites must exist
    pub fn from_courses(courses: Vec<Course>) -> Result<Self> {
        let mut titles = HashSet::new();
        for course in &courses {
            if !titles.insert(course.title.as_str()) {
                bail!("Duplicate course title: {}", course.title);
            }
            if course.cost < Decimal::ZERO {
                bail!("Course {} has a negative cost", course.title);
            }
        }
        for course in &courses {
            if let Some(unknown) = course.prerequisites.iter().find(|p| !titles.contains(p.as_str())) {
                bail!("Course {} requires unknown course {}", course.title, unknown);
            }
        }

        Ok(CourseCatalogue { courses })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let courses: Vec<Course> =
            serde_json::from_str(json).context("Failed to parse course catalogue JSON")?;
        CourseCatalogue::from_courses(courses)
    }

    /// Load catalogue from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read course catalogue: {:?}", path.as_ref()))?;
        CourseCatalogue::from_json(&content)
    }

    /// The catalogue bundled with the game
    pub fn florentine() -> Result<Self> {
        CourseCatalogue::from_json(FLORENTINE_COURSES)
    }

    pub fn get(&self, id: &str) -> Option<&Course> {
        self.courses.iter().find(|c| c.title == id)
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}

// ============================================================================
// COMPLETION HOOKS
// ============================================================================

/// Extension points run when a player finishes a course
pub trait CompletionHooks {
    fn grant_skills(&self, _player: &mut Player, _course: &Course) {}

    fn unlock_opportunities(&self, _player: &mut Player, _course: &Course) {}
}

/// Default: completion only records the course
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl CompletionHooks for NoHooks {}

/// Applies each course's `skills` and `unlocks` to the player
#[derive(Debug, Clone, Copy, Default)]
pub struct CourseRewards;

impl CompletionHooks for CourseRewards {
    fn grant_skills(&self, player: &mut Player, course: &Course) {
        for (skill, points) in &course.skills {
            let level = player.skills.entry(skill.clone()).or_insert(0);
            *level = level.saturating_add(*points);
        }
    }

    fn unlock_opportunities(&self, player: &mut Player, course: &Course) {
        player.opportunities.extend(course.unlocks.iter().cloned());
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentReceipt {
    pub course_id: String,
    pub cost: Gold,
    pub enrollment: Enrollment,
}

impl fmt::Display for EnrollmentReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "You have enrolled in {} for {} gold. Your studies will complete on {}.",
            self.course_id,
            format_gold(self.cost),
            self.enrollment.end_date.format("%-d %B %Y")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseCompletion {
    pub course_id: String,
}

impl fmt::Display for CourseCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Congratulations! You have completed the {} course.", self.course_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProgressUpdate {
    /// No active course
    Idle,
    InProgress { progress: u8 },
    Completed(CourseCompletion),
}

// ============================================================================
// EDUCATION SYSTEM
// ============================================================================

pub struct EducationSystem {
    catalogue: CourseCatalogue,
    hooks: Box<dyn CompletionHooks + Send + Sync>,
}

impl EducationSystem {
    /// System with no-op completion hooks
    pub fn new(catalogue: CourseCatalogue) -> Self {
        EducationSystem::with_hooks(catalogue, NoHooks)
    }

    pub fn with_hooks<H>(catalogue: CourseCatalogue, hooks: H) -> Self
    where
        H: CompletionHooks + Send + Sync + 'static,
    {
        EducationSystem {
            catalogue,
            hooks: Box::new(hooks),
        }
    }

    pub fn catalogue(&self) -> &CourseCatalogue {
        &self.catalogue
    }

    pub fn course_details(&self, id: &str) -> Option<&Course> {
        self.catalogue.get(id)
    }

    /// Courses open to the player's class whose prerequisites are all met
    pub fn available_courses(&self, player: &Player) -> Vec<&Course> {
        self.catalogue
            .courses()
            .iter()
            .filter(|course| course.is_available_to(player))
            .collect()
    }

    /// Available courses the player has not already completed
    pub fn enrollable_courses(&self, player: &Player) -> Vec<&Course> {
        self.available_courses(player)
            .into_iter()
            .filter(|course| !player.has_completed(course.id()))
            .collect()
    }

    /// Enroll and pay tuition
    ///
    /// Checks, in order: course exists, no active course, not already
    /// completed, social class, prerequisites, affordability.
    pub fn enroll(&self, player: &mut Player, course_id: &str, clock: &dyn Clock) -> Result<EnrollmentReceipt, GameError> {
        let course = self
            .catalogue
            .get(course_id)
            .ok_or_else(|| GameError::NotFound(format!("Course {}", course_id)))?;

        if let Some(current) = &player.current_course {
            return Err(GameError::AlreadyEnrolled(current.course_id.clone()));
        }
        if player.has_completed(course.id()) {
            return Err(GameError::AlreadyCompleted(course.title.clone()));
        }
        if !course.is_open_to(player.social_class) {
            return Err(GameError::Forbidden(course.title.clone()));
        }
        let missing = course.missing_prerequisites(player);
        if !missing.is_empty() {
            return Err(GameError::PrereqUnmet {
                course: course.title.clone(),
                missing,
            });
        }
        if player.money() < course.cost {
            return Err(GameError::InsufficientFunds {
                needed: course.cost,
                available: player.money(),
            });
        }

        let now = clock.now();
        if course.cost > Decimal::ZERO {
            player
                .ledger
                .spend_at(course.cost, &format!("Tuition: {}", course.title), now)?;
        }

        let enrollment = Enrollment {
            course_id: course.title.clone(),
            start_date: now,
            end_date: add_months(now, course.duration_months),
            progress: 0,
        };
        player.current_course = Some(enrollment.clone());
        info!(player = %player.id, course = %course.title, "enrolled");

        Ok(EnrollmentReceipt {
            course_id: course.title.clone(),
            cost: course.cost,
            enrollment,
        })
    }

    /// Recompute progress from the clock; completes the course at 100%
    pub fn update_progress(&self, player: &mut Player, clock: &dyn Clock) -> Result<ProgressUpdate, GameError> {
        let Some(current) = player.current_course.as_mut() else {
            return Ok(ProgressUpdate::Idle);
        };
        let now = clock.now();

        current.progress = progress_percent(current.start_date, current.end_date, now);
        if current.progress < 100 {
            return Ok(ProgressUpdate::InProgress {
                progress: current.progress,
            });
        }

        self.complete_course(player).map(ProgressUpdate::Completed)
    }

    /// Record the active course as completed and run completion hooks
    pub fn complete_course(&self, player: &mut Player) -> Result<CourseCompletion, GameError> {
        let enrollment = player.current_course.take().ok_or(GameError::NotEnrolled)?;
        let course_id = enrollment.course_id;

        player.completed_courses.insert(course_id.clone());
        match self.catalogue.get(&course_id) {
            Some(course) => {
                self.hooks.grant_skills(player, course);
                self.hooks.unlock_opportunities(player, course);
            }
            None => warn!(course = %course_id, "completed course missing from catalogue; hooks skipped"),
        }
        info!(player = %player.id, course = %course_id, "course completed");

        Ok(CourseCompletion { course_id })
    }
}

/// floor(100 × elapsed / total), clamped to 0..=100
fn progress_percent(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> u8 {
    let total = days_between(start, end);
    if total <= 0 {
        return 100;
    }
    let elapsed = days_between(start, now).max(0);
    let pct = (elapsed * 100 / total).clamp(0, 100);
    u8::try_from(pct).unwrap_or(100)
}

// ============================================================================
// TESTS
// ============================================================================
