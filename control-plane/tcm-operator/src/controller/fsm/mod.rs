pub mod actions;
pub mod evaluator;

pub use actions::{GateAction, gate_actions};
pub use evaluator::{EvalInput, EvalOutput, Phase, evaluate};
