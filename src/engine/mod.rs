//! Quote, plan, execution, and progress engines.
//!
//! The engines share one shape: pure domain logic fed by fresh reads
//! through the external interfaces, never by cached values, for anything
//! that gates a mutating call.

pub mod executor;
pub mod plan;
pub mod progress;
pub mod quote;

pub use executor::{CancelHandle, Executor};
pub use plan::{DepositInput, PlanBuilder, PoolWithdrawal, WithdrawInput, WithdrawalMethod};
pub use progress::{project, DisplayStatus, DisplayStep};
pub use quote::{CapacityCheck, DebouncedQuoter, FeeQuote, Quote, QuoteEngine, QuoteRequest};
