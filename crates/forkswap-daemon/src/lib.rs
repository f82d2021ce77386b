//! forkswap command line
//!
//! The `forkswap` binary is a thin shell over this library: [`cli`] parses
//! arguments, [`logging`] installs the subscriber and [`app`] wires the
//! configuration into the orchestrator and runs one subcommand.

pub mod app;
pub mod cli;
pub mod logging;

pub use app::{run, Exit};
pub use cli::{Action, Invocation};
pub use logging::LogFormat;
