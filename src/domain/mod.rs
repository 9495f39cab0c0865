//! Domain model: primitives, fixed-point price math, positions, and chain events.

pub mod events;
pub mod fixed;
pub mod position;
pub mod primitives;

pub use events::{
    ChainEvent, Envelope, EventMeta, ExecutedEvent, OpenedEvent, RemovedEvent, StopsUpdatedEvent,
};
pub use fixed::{bucket_id, format_px6, margin_usd6, notional_usd6, parse_px6, FixedError};
pub use position::{Asset, CloseReason, Position, PositionState, StopKind};
pub use primitives::{Addr, AddrParseError, Side, TimeMs};
