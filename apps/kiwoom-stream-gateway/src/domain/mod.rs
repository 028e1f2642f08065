//! Domain Layer - Market data and registration types.
//!
//! Pure types with no I/O: symbols and their wire codes, normalized ticks
//! and candles, downstream message shapes, and the upstream registration
//! state machine.

/// Symbols, ticks, candles, timeframes and downstream messages.
pub mod streaming;

/// Pending/batched/registered wire-code bookkeeping.
pub mod subscription;
