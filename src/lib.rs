// Florence - Core Library
// Economy ledger, education progression and identity plumbing for the
// life-simulation game. Exposes all modules for use in CLI, API server, and tests

pub mod money;
pub mod clock;
pub mod error;
pub mod ledger;
pub mod player;
pub mod education;
pub mod config;
pub mod db;
pub mod identity;

// Re-export commonly used types
pub use money::{format_gold, round_gold, Gold};
pub use clock::{add_months, days_between, Clock, ManualClock, ScaledClock, SystemClock};
pub use error::{GameError, IdentityError};
pub use ledger::{
    Expense, Frequency, IncomeSource, Investment, InvestmentReceipt, InvestmentSummary,
    Ledger, Loan, LoanReceipt, LoanSummary, Repayment, RiskLevel, Transaction, TransactionKind,
};
pub use player::{Enrollment, Player, SocialClass};
pub use education::{
    CompletionHooks, Course, CourseCatalogue, CourseCompletion, CourseRewards,
    EducationSystem, EnrollmentReceipt, NoHooks, ProgressUpdate,
};
pub use config::GameConfig;
pub use db::{
    Event, open_database, setup_database, save_player, load_player, load_player_by_owner,
    load_local_player, insert_event, get_events_for_entity, export_transactions_csv,
};
pub use identity::{
    IdentityGateway, SqliteGateway, User,
    register_user, authenticate, create_session, resolve_session, destroy_session,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
