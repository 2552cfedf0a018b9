pub(crate) mod driver;
pub mod session;

pub use driver::SessionSignal;
pub use session::{SessionState, SessionStateMachine};
