// 🧑 Player - The record the ledger and education system operate on
// Owned by the caller (game loop, server handler); nothing here persists itself.

use crate::ledger::Ledger;
use crate::money::Gold;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SOCIAL CLASS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialClass {
    Peasant,
    Artisan,
    Commoner,
    Merchant,
    Clergy,
    Nobility,
}

impl SocialClass {
    pub const ALL: [SocialClass; 6] = [
        SocialClass::Peasant,
        SocialClass::Artisan,
        SocialClass::Commoner,
        SocialClass::Merchant,
        SocialClass::Clergy,
        SocialClass::Nobility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocialClass::Peasant => "peasant",
            SocialClass::Artisan => "artisan",
            SocialClass::Commoner => "commoner",
            SocialClass::Merchant => "merchant",
            SocialClass::Clergy => "clergy",
            SocialClass::Nobility => "nobility",
        }
    }
}

impl fmt::Display for SocialClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        SocialClass::ALL
            .into_iter()
            .find(|class| class.as_str() == wanted)
            .ok_or_else(|| format!("unknown social class: {}", s))
    }
}

// ============================================================================
// ENROLLMENT
// ============================================================================

/// The course a player is currently studying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub course_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// 0..=100
    pub progress: u8,
}

// ============================================================================
// PLAYER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Stable identity (UUID)
    pub id: String,
    pub name: String,
    pub social_class: SocialClass,
    pub ledger: Ledger,
    #[serde(default)]
    pub completed_courses: BTreeSet<String>,
    #[serde(default)]
    pub current_course: Option<Enrollment>,
    /// Skill name → level, filled in by completion hooks
    #[serde(default)]
    pub skills: BTreeMap<String, u32>,
    /// Careers and other unlocks earned through education
    #[serde(default)]
    pub opportunities: BTreeSet<String>,
    /// In-game date the save was last played up to
    #[serde(default)]
    pub game_date: Option<DateTime<Utc>>,
}

impl Player {
    pub fn new(name: &str, social_class: SocialClass, ledger: Ledger) -> Self {
        Player {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            social_class,
            ledger,
            completed_courses: BTreeSet::new(),
            current_course: None,
            skills: BTreeMap::new(),
            opportunities: BTreeSet::new(),
            game_date: None,
        }
    }

    /// Where a resumed game's clock starts
    ///
    /// The saved game date wins; older saves fall back to the last
    /// transaction, then to `epoch`.
    pub fn resume_date(&self, epoch: DateTime<Utc>) -> DateTime<Utc> {
        self.game_date
            .or_else(|| self.ledger.transactions().last().map(|tx| tx.timestamp))
            .unwrap_or(epoch)
    }

    /// Spendable gold (the ledger balance)
    pub fn money(&self) -> Gold {
        self.ledger.balance()
    }

    pub fn is_enrolled(&self) -> bool {
        self.current_course.is_some()
    }

    pub fn has_completed(&self, course_id: &str) -> bool {
        self.completed_courses.contains(course_id)
    }

    pub fn skill(&self, name: &str) -> u32 {
        self.skills.get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_social_class_parse() {
        assert_eq!("Commoner".parse::<SocialClass>(), Ok(SocialClass::Commoner));
        assert_eq!(" nobility ".parse::<SocialClass>(), Ok(SocialClass::Nobility));
        assert!("serf".parse::<SocialClass>().is_err());
    }

    #[test]
    fn test_new_player() {
        let player = Player::new("Lorenzo", SocialClass::Merchant, Ledger::new(Decimal::from(100)));

        assert_eq!(player.money(), Decimal::from(100));
        assert!(!player.is_enrolled());
        assert!(!player.has_completed("Trivium Studies"));
        assert_eq!(player.skill("logic"), 0);
        assert_eq!(player.id.len(), 36);
    }

    #[test]
    fn test_player_json_defaults() {
        let player = Player::new("Caterina", SocialClass::Nobility, Ledger::default());
        let mut value = serde_json::to_value(&player).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("skills");
        obj.remove("opportunities");
        obj.remove("game_date");

        let restored: Player = serde_json::from_value(value).unwrap();
        assert_eq!(restored, player);
    }

    #[test]
    fn test_resume_date_prefers_saved_game_date() {
        use crate::clock::ManualClock;
        use chrono::TimeZone;

        let epoch = Utc.with_ymd_and_hms(1480, 3, 1, 0, 0, 0).unwrap();
        let mut player = Player::new("Caterina", SocialClass::Merchant, Ledger::new(Decimal::from(100)));
        assert_eq!(player.resume_date(epoch), epoch);

        let mut clock = ManualClock::new(epoch);
        clock.advance_days(2);
        player.ledger.earn_gold(Decimal::from(10), "Job", &clock).unwrap();
        assert_eq!(player.resume_date(epoch), epoch + chrono::Duration::days(2));

        // Days that left no transaction still count
        player.game_date = Some(epoch + chrono::Duration::days(40));
        assert_eq!(player.resume_date(epoch), epoch + chrono::Duration::days(40));
    }
}
