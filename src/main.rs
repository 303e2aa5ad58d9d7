//! tickdb CLI entry point
//!
//! Parses arguments and dispatches to the CLI module. Failures are reported
//! as a JSON error line on stdout plus a plain message on stderr, and the
//! process exits non-zero.

use tickdb::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
