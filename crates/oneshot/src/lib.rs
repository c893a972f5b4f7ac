mod errors;
mod oneshot;

pub use errors::ReceiveError;
pub use oneshot::channel;
pub use oneshot::OneshotChannelReceiver;
pub use oneshot::OneshotChannelSender;
