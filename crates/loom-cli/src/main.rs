//! loom-cli/src/main.rs
//!
//! Entry point for the `loom` binary: prepare the environment (logging,
//! error reporting) then delegate to `loom_cli::run()`. Keeping `lib.rs`
//! separate lets the subcommands be unit-tested without going through
//! argv.

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to initialize color-eyre: {e}");
    }

    env_logger::init();

    if let Err(err) = loom_cli::run() {
        eprintln!("error: {err}");

        if std::env::var("RUST_BACKTRACE").as_deref() == Ok("1") {
            let bt = err.backtrace();
            eprintln!("\nbacktrace:\n{bt}");
        }

        std::process::exit(1);
    }
}
