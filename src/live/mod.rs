pub mod dispatcher;
pub mod events;
pub mod merger;
pub mod records;
pub mod store;

pub use dispatcher::{DispatchStats, MessageDispatcher};
pub use events::{OrderEvent, TickEvent};
pub use merger::EntityMerger;
pub use records::{PositionRecord, PositionSnapshot, WatchlistRecord};
pub use store::{LiveSnapshot, LiveStateStore, StoreChange, SubscriptionId};
