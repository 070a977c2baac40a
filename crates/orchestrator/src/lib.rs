//! Engine assembly.
//!
//! Wires venue adapters, the position store, the equity engine, the ledger
//! actor, the settlement coordinator, and the netting executor into one
//! running service, and exposes the operator surface.

pub mod admin;
pub mod pressure;
pub mod registry;
pub mod service;

pub use admin::AdminApi;
pub use pressure::Watermarks;
pub use registry::VenueRegistry;
pub use service::EngineService;
