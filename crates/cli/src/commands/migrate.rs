use dealflow_core::config::LoadOptions;

use crate::commands::{execute, CommandResult, Success};

/// Migrations run as part of every command's setup, so there is nothing left
/// to do once the pool is open.
pub fn run(options: LoadOptions) -> CommandResult {
    execute("migrate", options, |_, _| async {
        Ok(Success::message("applied pending migrations"))
    })
}
