//! Session orchestration: wires quoting, planning, and execution into one
//! modal flow per wallet.

pub mod session;

pub use session::{ActionReport, Session, SessionPhase};
