//! Compile-time configuration.
//!
//! Queue depths, buffer sizes and protocol timeouts used throughout the host.
//! All values are plain constants so that storage can be sized at compile time
//! without an allocator.

use embassy_time::Duration;

/// Max size of a reassembled L2CAP PDU payload.
///
/// This bounds the size of any ATT PDU and therefore the negotiable ATT MTU.
///
/// Default: 251.
pub const L2CAP_MTU: usize = 251;

/// Local ceiling for the ATT MTU exchange.
///
/// The negotiated MTU is the minimum of the requested value, the peer's
/// offer and this constant. The L2CAP header takes 4 bytes of every PDU.
pub const ATT_MTU_MAX: usize = L2CAP_MTU - 4;

/// Number of connection slots.
///
/// Default: 4.
pub const MAX_CONNECTIONS: usize = 4;

/// Number of in-flight HCI command slots.
///
/// Commands beyond this are rejected with a busy error until a slot frees up.
///
/// Default: 4.
pub const COMMAND_SLOTS: usize = 4;

/// Connection event queue size
///
/// This is the connection event queue size for every connection.
///
/// Default: 2.
pub const CONNECTION_EVENT_QUEUE_SIZE: usize = 2;

/// Inbound ATT queue depth, per connection.
///
/// Default: 4.
pub const ATT_RX_QUEUE_SIZE: usize = 4;

/// Advertising report queue depth.
///
/// The scanner queue is bounded and lossy. When the consumer falls behind,
/// new reports are dropped and counted rather than stalling the event loop.
///
/// Default: 4.
pub const SCAN_QUEUE_SIZE: usize = 4;

/// GATT notification max subscribers
///
/// Default: 4.
pub const GATT_CLIENT_NOTIFICATION_MAX_SUBSCRIBERS: usize = 4;

/// GATT notification queue size.
///
/// Default: 4.
pub const GATT_CLIENT_NOTIFICATION_QUEUE_SIZE: usize = 4;

/// Bound on HCI command completion.
///
/// A controller that has not answered a command within this window is
/// considered unresponsive and the caller gets a timeout error. The engine
/// itself keeps running.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on an ATT transaction, mirroring the ATT transaction timeout.
///
/// A request that has not seen its response within this window resolves
/// with a timeout error instead of blocking the connection's request slot
/// forever.
pub const ATT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on an in-progress L2CAP reassembly.
///
/// A peer that starts a fragmented PDU and never finishes it within this
/// window is treated as having sent a malformed PDU and the connection is
/// torn down.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);
