//! Local agent process handling.
//!
//! This module owns everything between the orchestrator and the agent
//! executable: locating it, spawning it with piped stdio, framing and
//! decoding its newline-delimited JSON output, and tearing it down.
//!
//! - `locator`: bundled script → install directories → `PATH` probe.
//! - `codec`: newline framing that never errors on bad input.
//! - `decoder`: one line → one [`Event`](decoder::Event).
//! - `reader`: stdout reader and stderr drain tasks.
//! - `watchdog`: idle timer armed while a turn is open.
//! - `session`: process lifecycle, prompt writes, per-turn event streams.

pub mod codec;
pub mod decoder;
pub mod locator;
pub mod reader;
pub mod session;
pub mod watchdog;

pub use decoder::{decode, Event};
pub use locator::{AgentExecutable, ExecutableKind, Locator};
pub use session::{EventStream, SessionConfig, SessionHandle, SessionManager};
