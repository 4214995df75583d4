// =============================================================================
// Trade Console — live data layer
// =============================================================================
//
// Keeps the console's positions, watchlist, latest order update and channel
// connectivity current from two streaming channels (`ticks`, `orders`),
// seeded by REST snapshots and served to the dashboard over `/api/v1`.
// =============================================================================

pub mod api;
pub mod app_state;
pub mod channel;
pub mod live;
pub mod runtime_config;
pub mod types;
pub mod upstream;
