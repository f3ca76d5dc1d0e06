//! # haulage - freight marketplace core
//!
//! Shipment negotiation and fulfillment for a marketplace connecting
//! shippers (cargo owners) with carriers (transport providers).
//!
//! ## Architecture
//!
//! - **Identity**: external collaborator resolving users, roles and reference data
//! - **Shipments**: listings and their lifecycle, public discovery search
//! - **Offers**: competing carrier proposals and the atomic acceptance protocol
//! - **Contracts**: the binding agreement formed from exactly one accepted offer
//! - **Tracking**: append-only physical-progress timeline per contract
//! - **Reviews**: peer ratings and the reviewed user's reputation aggregate
//!
//! The database is the only shared mutable state. Every multi-row transition
//! runs inside one SQLite transaction guarded by conditional status updates.

pub mod auth;
pub mod config;
pub mod contracts;
pub mod database;
pub mod error;
pub mod identity;
pub mod model;
pub mod offers;
pub mod pagination;
pub mod reviews;
pub mod routes;
pub mod shipments;
pub mod tracking;

pub use auth::{Caller, Claims, TokenService};
pub use config::AppConfig;
pub use contracts::ContractService;
pub use database::Database;
pub use error::{MarketError, Result};
pub use identity::IdentityService;
pub use model::{
    Contract, ContractStatus, Offer, OfferStatus, Review, Role, Shipment, ShipmentStatus,
    StatusUpdate, TrackingStatus,
};
pub use offers::OfferService;
pub use pagination::{Page, PageRequest};
pub use reviews::ReviewService;
pub use routes::{app, AppState};
pub use shipments::ShipmentService;
pub use tracking::StatusTracker;

pub type UserId = uuid::Uuid;
pub type ShipmentId = uuid::Uuid;
pub type OfferId = uuid::Uuid;
pub type ContractId = uuid::Uuid;
pub type StatusUpdateId = uuid::Uuid;
pub type ReviewId = uuid::Uuid;
