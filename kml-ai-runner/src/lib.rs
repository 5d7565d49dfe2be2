//! Coding-assistant command construction, PTY output filtering, and
//! structured record classification (C4).

pub mod command;
pub mod executor;
pub mod filter;
pub mod records;
pub mod runner;

pub use command::{SessionFlag, build_command};
pub use executor::PtyExecutor;
pub use filter::LineFilter;
pub use records::{OutputRecord, classify, classify_exit};
pub use runner::AiRunner;
