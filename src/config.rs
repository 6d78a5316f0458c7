// ⚙️ Game Configuration
// JSON file (optional) + environment overrides. Every field has a default so an
// empty `{}` is a valid config.

use crate::education::CourseCatalogue;
use crate::ledger::{default_inflation_rate, default_tax_rate, Ledger};
use crate::money::Gold;
use crate::player::{Player, SocialClass};
use anyhow::{ensure, Context as AnyhowContext, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Env var naming the config file
pub const CONFIG_ENV: &str = "FLORENCE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Income tax as a fraction (0.10 = 10%)
    pub tax_rate: Decimal,

    /// Annual inflation as a fraction
    pub inflation_rate: Decimal,

    /// Gold given to a new player
    pub starting_gold: Gold,

    pub default_social_class: SocialClass,

    /// SQLite file for users, sessions and saves
    pub database_path: PathBuf,

    /// Course catalogue JSON (None = bundled Florentine catalogue)
    pub catalogue_path: Option<PathBuf>,

    pub bind_addr: String,

    pub session_max_age_hours: i64,

    /// Game days per real day
    pub time_scale: u32,

    /// In-game date the world starts on
    pub game_start: NaiveDate,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            tax_rate: default_tax_rate(),
            inflation_rate: default_inflation_rate(),
            starting_gold: Decimal::from(100),
            default_social_class: SocialClass::Commoner,
            database_path: PathBuf::from("florence.db"),
            catalogue_path: None,
            bind_addr: "0.0.0.0:3000".to_string(),
            session_max_age_hours: 24,
            time_scale: 1,
            game_start: NaiveDate::from_ymd_opt(1480, 3, 1).unwrap_or_default(),
        }
    }
}

impl GameConfig {
    /// Load config from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: GameConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Config file from `FLORENCE_CONFIG` (or defaults), then env overrides
    pub fn load() -> Result<Self> {
        let mut config = match env::var(CONFIG_ENV) {
            Ok(path) => GameConfig::from_file(&path)?,
            Err(_) => GameConfig::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// `PORT` replaces the bind port, `FLORENCE_DB` the database path
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT: {}", port))?;
            let host = self
                .bind_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.bind_addr = format!("{}:{}", host, port);
        }
        if let Some(db) = lookup("FLORENCE_DB") {
            self.database_path = PathBuf::from(db);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let rate_ok = |rate: Decimal| rate >= Decimal::ZERO && rate < Decimal::ONE;
        ensure!(rate_ok(self.tax_rate), "tax_rate must be in [0, 1), got {}", self.tax_rate);
        ensure!(
            rate_ok(self.inflation_rate),
            "inflation_rate must be in [0, 1), got {}",
            self.inflation_rate
        );
        ensure!(self.starting_gold >= Decimal::ZERO, "starting_gold must not be negative");
        ensure!(self.session_max_age_hours > 0, "session_max_age_hours must be positive");
        ensure!(self.time_scale > 0, "time_scale must be at least 1");
        Ok(())
    }

    /// Configured catalogue, or the bundled one
    pub fn load_catalogue(&self) -> Result<CourseCatalogue> {
        match &self.catalogue_path {
            Some(path) => CourseCatalogue::from_file(path),
            None => CourseCatalogue::florentine(),
        }
    }

    /// Empty ledger with the configured rates and starting gold
    pub fn new_ledger(&self) -> Ledger {
        Ledger::with_rates(self.starting_gold, self.tax_rate, self.inflation_rate)
    }

    pub fn new_player(&self, name: &str, social_class: Option<SocialClass>) -> Player {
        Player::new(
            name,
            social_class.unwrap_or(self.default_social_class),
            self.new_ledger(),
        )
    }

    pub fn game_epoch(&self) -> DateTime<Utc> {
        self.game_start
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tax_rate, Decimal::new(10, 2));
        assert_eq!(config.session_max_age_hours, 24);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GameConfig =
            serde_json::from_str(r#"{ "starting_gold": "250", "time_scale": 30 }"#).unwrap();

        assert_eq!(config.starting_gold, Decimal::from(250));
        assert_eq!(config.time_scale, 30);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.new_ledger().balance(), Decimal::from(250));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("PORT", "8080"), ("FLORENCE_DB", "/tmp/game.db")]
            .into_iter()
            .collect();
        let mut config = GameConfig::default();

        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.database_path, PathBuf::from("/tmp/game.db"));

        let mut bad = GameConfig::default();
        assert!(bad.apply_overrides(|_| Some("not-a-port".to_string())).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_rates() {
        let config = GameConfig {
            tax_rate: Decimal::ONE,
            ..GameConfig::default()
        };
        assert!(config.validate().is_err());

        let config = GameConfig {
            time_scale: 0,
            ..GameConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_new_player_uses_default_class() {
        let config = GameConfig::default();
        let player = config.new_player("Ginevra", None);
        assert_eq!(player.social_class, SocialClass::Commoner);
        assert_eq!(player.money(), Decimal::from(100));

        let noble = config.new_player("Piero", Some(SocialClass::Nobility));
        assert_eq!(noble.social_class, SocialClass::Nobility);
    }
}
