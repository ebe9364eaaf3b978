use std::process::ExitCode;

fn main() -> ExitCode {
    calhelper_cli::run()
}
