pub mod acquisition;
pub mod congestion;
pub mod dispatcher;
pub mod error;
pub mod receiver;
pub mod rtt;
pub mod sender;

#[cfg(test)]
mod test_util;

pub use acquisition::{AcquisitionRecord, AcquisitionStatus};
pub use congestion::CongestionController;
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use receiver::ReceiverSession;
pub use rtt::RttEstimator;
pub use sender::{AckOutcome, SenderSession};
