//! Domain models shared across the engine.

pub mod analysis;
pub mod audit;
pub mod intent;
pub mod position;
pub mod symbol;

pub use analysis::{AgentKind, AgentPayload, AnalysisBundle, AnalysisResult, FailureKind};
pub use audit::{AuditEntry, AuditRecord, EquitySnapshot, ReverseEvent, ReverseOutcome};
pub use intent::{Direction, Side, TradeIntent};
pub use position::{
    ClosedPosition, CloseReason, Position, PositionOrigin, ReverseState, TrailingState,
};
pub use symbol::Symbol;
