//! Binary entrypoint that launches the terminal chat client.

use std::process::ExitCode;

use empatech_chat::repl;

/// Connect to the chat backend configured by `EMPATECH_*` and read commands from stdin.
fn main() -> ExitCode {
    repl::run()
}
