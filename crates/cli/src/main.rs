use std::process::ExitCode;

fn main() -> ExitCode {
    stagegate_cli::run()
}
