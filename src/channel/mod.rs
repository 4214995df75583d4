pub mod backoff;
pub mod driver;
pub mod socket;
pub mod supervisor;

pub use backoff::Backoff;
pub use driver::{ChannelCommand, TimerScheduler};
pub use socket::{ChannelSocket, CloseCause, ReconnectScheduler};
pub use supervisor::{ChannelLease, ChannelSupervisor};
