use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    match gridlabel::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}
