pub mod realtime;
pub mod session;

pub use realtime::{
    EventSink, RealtimeError, RealtimeResult, SessionController, SessionEvent, SessionOutcome,
    SessionState, UpstreamConfig, UpstreamConnector, WsConnector,
};
pub use session::{SessionLease, SessionRegistry, StoppedSession};
