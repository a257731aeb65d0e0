use std::io::{self, IsTerminal};

/// Reports whether the process output streams are attached to a terminal.
pub trait TerminalClient {
    /// Returns whether stdout is an interactive terminal.
    fn stdout_is_terminal(&self) -> bool;

    /// Returns whether stderr is an interactive terminal.
    fn stderr_is_terminal(&self) -> bool;
}

/// Terminal client backed by the real process streams.
#[derive(Debug, Default)]
pub(crate) struct SystemTerminalClient;

impl TerminalClient for SystemTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn stderr_is_terminal(&self) -> bool {
        io::stderr().is_terminal()
    }
}
