pub mod machine;
pub mod notice;
pub mod status;

pub use machine::{
    SessionBackends, SessionCommand, SessionContext, SessionMachine, SessionOptions,
};
pub use notice::{Notice, NoticeKind};
pub use status::{SessionPhase, SessionStatus, SessionStatusHandle};
