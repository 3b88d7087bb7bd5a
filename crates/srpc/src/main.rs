//! `srpcd`: offers an echo service over the srpc engine until signalled.

use std::process::ExitCode;

fn main() -> ExitCode {
    match srpc::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("srpcd: {error}");
            ExitCode::FAILURE
        }
    }
}
