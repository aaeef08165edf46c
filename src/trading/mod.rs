//! Trading logic: risk sizing, trailing stop, daily gate, entry/exit engine.

mod engine;
mod position_sizer;
mod risk_gate;
mod trailing;

pub use engine::{
    Action, DecisionEngine, EngineSettings, EntryDecision, ExitDecision, SymbolInputs, SymbolOutcome,
};
pub use position_sizer::PositionSizer;
pub use risk_gate::allow_new_entries;
