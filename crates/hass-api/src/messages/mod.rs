//! Wire-level message shapes: outbound commands and the inbound envelope.

pub mod inbound;
pub mod outbound;
