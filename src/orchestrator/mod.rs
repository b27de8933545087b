//! 编排层：会话聚合、单轮状态机与过程事件

pub mod events;
pub mod session;
pub mod turn;

pub use events::TurnEvent;
pub use session::Session;
pub use turn::{run_turn, TurnContext, TurnOutcome};
