pub(crate) mod command;
pub(crate) mod decode;
pub(crate) mod listen;
pub(crate) mod ui;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::decode::DecodeArgs;
pub use self::listen::ListenArgs;
