//! 核心层：错误分类、展示状态投影、会话运行时

pub mod engine;
pub mod error;
pub mod state;

pub use engine::{create_session, ChatComponents, Command};
pub use error::ChatError;
pub use state::{DisplayState, SessionPhase};
