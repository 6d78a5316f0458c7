// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Use library instead of local modules
use florence::{
    export_transactions_csv, format_gold, load_local_player, open_database, save_player,
    Clock, CourseRewards, EducationSystem, Frequency, GameConfig, ManualClock, Player,
    ProgressUpdate, RiskLevel,
};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let config = GameConfig::load()?;
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("demo") => run_demo(&config)?,
        Some("courses") => run_courses(&config)?,
        Some("export") => {
            let csv_path = args.get(2).context("Usage: florence export <file.csv>")?;
            run_export(&config, Path::new(csv_path))?;
        }
        // UI mode (default)
        _ => run_ui_mode(&config)?,
    }

    Ok(())
}

/// Scripted session: the classic economy walkthrough, then a course start to finish
fn run_demo(config: &GameConfig) -> Result<()> {
    println!("🏛️  Florence - Demo Session");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut clock = ManualClock::new(config.game_epoch());
    let education = EducationSystem::with_hooks(config.load_catalogue()?, CourseRewards);
    let mut player = config.new_player("Giovanni", None);

    // 1. Economy
    println!("\n💰 Economy");
    let balance = player.ledger.earn_gold(Decimal::from(50), "Job", &clock)?;
    println!("✓ Earned from Job. Total gold: {}", format_gold(balance));
    let balance = player.ledger.spend_gold(Decimal::from(30), "Education", &clock)?;
    println!("✓ Spent on Education. Total gold: {}", format_gold(balance));
    player
        .ledger
        .add_income_source("Business", Decimal::from(10), Frequency::Daily)?;
    println!("✓ Added income source: Business (10 gold daily)");
    let loan = player.ledger.take_loan(Decimal::from(200), Decimal::from(5), 30, &clock)?;
    println!("✓ {}", loan);
    let investment = player
        .ledger
        .invest(Decimal::from(50), Decimal::from(10), RiskLevel::Medium, &clock)?;
    println!("✓ {}", investment);
    println!("✓ Balance: {}", format_gold(player.money()));

    // 2. Education
    println!("\n🎓 Education");
    let available = education.enrollable_courses(&player);
    let Some(course) = available.first() else {
        println!("No courses available to a {}", player.social_class);
        return Ok(());
    };
    let course_id = course.id().to_string();
    let receipt = education.enroll(&mut player, &course_id, &clock)?;
    println!("✓ {}", receipt);

    loop {
        clock.advance_days(30);
        player.ledger.pay_income(30, &clock)?;
        match education.update_progress(&mut player, &clock)? {
            ProgressUpdate::InProgress { progress } => {
                println!("  {} - {}% complete", clock.now().format("%B %Y"), progress)
            }
            ProgressUpdate::Completed(done) => {
                println!("✓ {}", done);
                break;
            }
            ProgressUpdate::Idle => break,
        }
    }

    // 3. Save
    player.game_date = Some(clock.now());
    let conn = open_database(&config.database_path)?;
    save_player(&conn, &player, None)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Saved {} to {:?}", player.name, config.database_path);
    println!("   Gold: {}  Net worth: {}", format_gold(player.money()), format_gold(player.ledger.net_worth()));
    println!("   Transactions: {}", player.ledger.transactions().len());
    println!("   Skills: {:?}", player.skills);

    Ok(())
}

fn run_courses(config: &GameConfig) -> Result<()> {
    let catalogue = config.load_catalogue()?;

    println!("📚 {} courses", catalogue.len());
    for course in catalogue.courses() {
        let classes: Vec<&str> = course.available_to.iter().map(|c| c.as_str()).collect();
        println!(
            "\n{} - {} gold, {} months\n  {}\n  Open to: {}",
            course.title,
            format_gold(course.cost),
            course.duration_months,
            course.description,
            classes.join(", ")
        );
        if !course.prerequisites.is_empty() {
            let prereqs: Vec<&str> = course.prerequisites.iter().map(String::as_str).collect();
            println!("  Requires: {}", prereqs.join(", "));
        }
    }

    Ok(())
}

fn run_export(config: &GameConfig, csv_path: &Path) -> Result<()> {
    let conn = open_database(&config.database_path)?;
    let player = load_local_player(&conn)?
        .context("No saved game found. Run: florence demo")?;

    let rows = export_transactions_csv(csv_path, &player.ledger)?;
    println!("✓ Exported {} transactions of {} to {:?}", rows, player.name, csv_path);

    Ok(())
}

/// Local save, or a fresh player if none exists yet
#[cfg(feature = "tui")]
fn load_or_create_player(conn: &rusqlite::Connection, config: &GameConfig) -> Result<Player> {
    match load_local_player(conn)? {
        Some(player) => Ok(player),
        None => Ok(config.new_player("Giovanni", None)),
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &GameConfig) -> Result<()> {
    println!("🖥️  Loading Florence...\n");

    let conn = open_database(&config.database_path)?;
    let player = load_or_create_player(&conn, config)?;
    let education = EducationSystem::with_hooks(config.load_catalogue()?, CourseRewards);

    // Turn-based: the game day only moves when the player presses `n`
    let clock = ManualClock::new(player.resume_date(config.game_epoch()));

    let mut app = ui::App::new(player, education, clock);
    ui::run_ui(&mut app)?;

    save_player(&conn, &app.player, None)?;
    println!("\n✅ Game saved to {:?}", config.database_path);

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &GameConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or try: florence demo");
    std::process::exit(1);
}
