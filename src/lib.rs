pub mod chain;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod index;
pub mod oracle;
pub mod orchestration;
pub mod positions;
pub mod registry;
pub mod router;

pub use chain::{LedgerClient, MockLedger};
pub use config::Config;
pub use domain::{
    format_amount, parse_amount, ChainId, Market, MarketId, PoolKind, Precision, StepPlan,
    TokenSymbol, WithdrawalWindow,
};
pub use engine::{
    CancelHandle, DebouncedQuoter, Executor, PlanBuilder, Quote, QuoteEngine, QuoteRequest,
};
pub use error::{FlowError, Remediation};
pub use orchestration::{ActionReport, Session, SessionPhase};
pub use positions::PositionService;
pub use registry::MarketRegistry;
