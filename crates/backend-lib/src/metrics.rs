// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for Prometheus metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const ROOMS_ACTIVE: &str = "rooms.active";
pub const BROADCAST_DROPPED: &str = "broadcast.dropped";
pub const RSVP_COMMITTED: &str = "rsvp.committed";
pub const RSVP_REJECTED: &str = "rsvp.rejected";
pub const WAITLIST_PROMOTED: &str = "waitlist.promoted";
pub const NOTIFY_FAILED: &str = "notify.failed";
pub const CHECKIN_RECORDED: &str = "checkin.recorded";
pub const MESSAGE_POSTED: &str = "message.posted";
pub const EVENT_CREATED: &str = "event.created";
