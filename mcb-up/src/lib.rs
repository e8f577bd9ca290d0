//! mcb-up library interface
//!
//! Client-side batch upload orchestration for photographs imported from
//! Mapillary: collection/batch state store, filename template engine,
//! denylist filter, title verification, upload orchestrator and the duplex
//! upload channel.

pub mod channel;
pub mod denylist;
pub mod orchestrator;
pub mod store;
pub mod template;
pub mod verify;
