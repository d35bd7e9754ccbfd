//! Command trait definition for CLI commands.
//!
//! All fgdup CLI commands implement [`Command`]; `enum_dispatch` provides
//! efficient dispatch across the subcommand enum.

use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// Trait implemented by all fgdup CLI commands.
///
/// The `command_line` parameter carries the full invocation for @PG records.
#[enum_dispatch]
pub trait Command {
    #[allow(clippy::missing_errors_doc)]
    fn execute(&self, command_line: &str) -> Result<()>;
}
