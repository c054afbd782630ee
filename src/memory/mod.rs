//! 记忆层：单次运行的对话记录与运行级累积状态（不跨运行共享，不持久化）

pub mod conversation;
pub mod journey;
pub mod research;

pub use conversation::{Message, Role};
pub use journey::{JourneyContext, JourneyPhase, JourneyStage, PhaseTracker, PhaseTransition};
pub use research::{ResearchState, SocialIcpState};
