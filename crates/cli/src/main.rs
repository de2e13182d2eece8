use std::process::ExitCode;

fn main() -> ExitCode {
    dealflow_cli::run()
}
