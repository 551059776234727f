use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(err) = calypso_kernel::run() {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
