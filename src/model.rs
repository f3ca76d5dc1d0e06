use crate::{
    ContractId, MarketError, OfferId, Result, ReviewId, ShipmentId, StatusUpdateId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Shipper,
    Carrier,
    Admin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    Active,
    InTransit,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
    Withdrawn,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Completed,
    Cancelled,
    Disputed,
}

/// Physical-progress events recorded against a contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Loading,
    InTransit,
    Delayed,
    Delivered,
    IssueReported,
}

/// Implements `as_str`, `Display` and `FromStr` over the snake_case wire names
/// that are also stored in the database.
macro_rules! string_enum {
    ($ty:ident, $label:literal { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = MarketError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(MarketError::Validation(format!(
                        "unknown {} '{}'",
                        $label, other
                    ))),
                }
            }
        }
    };
}

string_enum!(Role, "role" {
    Shipper => "shipper",
    Carrier => "carrier",
    Admin => "admin",
});

string_enum!(ShipmentStatus, "shipment status" {
    Pending => "pending",
    Active => "active",
    InTransit => "in_transit",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

string_enum!(OfferStatus, "offer status" {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Countered => "countered",
    Withdrawn => "withdrawn",
});

string_enum!(ContractStatus, "contract status" {
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
    Disputed => "disputed",
});

string_enum!(TrackingStatus, "tracking status" {
    Loading => "loading",
    InTransit => "in_transit",
    Delayed => "delayed",
    Delivered => "delivered",
    IssueReported => "issue_reported",
});

impl ShipmentStatus {
    pub fn allowed_transitions(&self) -> &'static [ShipmentStatus] {
        use ShipmentStatus::*;
        match self {
            Pending => &[Active, Cancelled],
            Active => &[InTransit, Delivered, Cancelled],
            InTransit => &[Delivered, Cancelled],
            Delivered | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: ShipmentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn accepts_offers(&self) -> bool {
        *self == ShipmentStatus::Pending
    }
}

impl OfferStatus {
    pub fn allowed_transitions(&self) -> &'static [OfferStatus] {
        use OfferStatus::*;
        match self {
            Pending => &[Accepted, Rejected, Countered, Withdrawn],
            Countered => &[Pending, Rejected, Withdrawn],
            Accepted | Rejected | Withdrawn => &[],
        }
    }

    pub fn can_transition_to(&self, next: OfferStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl ContractStatus {
    pub fn allowed_transitions(&self) -> &'static [ContractStatus] {
        use ContractStatus::*;
        match self {
            Active => &[Completed, Cancelled, Disputed],
            Disputed => &[Active, Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Progress may only be reported while the contract is being worked.
    pub fn accepts_tracking(&self) -> bool {
        matches!(self, ContractStatus::Active | ContractStatus::Disputed)
    }

    /// Shipment status implied by entering this contract status, if any.
    pub fn shipment_effect(&self) -> Option<ShipmentStatus> {
        match self {
            ContractStatus::Completed => Some(ShipmentStatus::Delivered),
            ContractStatus::Cancelled => Some(ShipmentStatus::Cancelled),
            ContractStatus::Active | ContractStatus::Disputed => None,
        }
    }
}

impl TrackingStatus {
    /// Shipment status implied by recording this event, if any.
    pub fn shipment_effect(&self) -> Option<ShipmentStatus> {
        match self {
            TrackingStatus::Loading | TrackingStatus::InTransit => Some(ShipmentStatus::InTransit),
            TrackingStatus::Delivered => Some(ShipmentStatus::Delivered),
            TrackingStatus::Delayed | TrackingStatus::IssueReported => None,
        }
    }
}

fn transition_error<S: fmt::Display>(entity: &str, from: S, to: S) -> MarketError {
    MarketError::Conflict(format!("{} cannot move from '{}' to '{}'", entity, from, to))
}

pub fn check_shipment_transition(from: ShipmentStatus, to: ShipmentStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(transition_error("shipment", from, to))
    }
}

pub fn check_offer_transition(from: OfferStatus, to: OfferStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(transition_error("offer", from, to))
    }
}

pub fn check_contract_transition(from: ContractStatus, to: ContractStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(transition_error("contract", from, to))
    }
}

// Entities

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub rating: Option<f64>,
    pub trips_completed: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reputation {
    pub user_id: UserId,
    pub rating: Option<f64>,
    pub trips_completed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shipment {
    pub id: ShipmentId,
    pub owner_id: UserId,
    pub cargo_type_id: Uuid,
    pub cargo_description: Option<String>,
    pub weight_kg: f64,
    pub volume_m3: Option<f64>,
    pub pickup_location: String,
    pub pickup_time: DateTime<Utc>,
    pub delivery_location: String,
    pub delivery_time: DateTime<Utc>,
    pub vehicle_type_id: Option<Uuid>,
    pub price_offer: Option<f64>,
    pub status: ShipmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A shipment as shown in public discovery, with the owner's trust signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShipmentListing {
    #[serde(flatten)]
    pub shipment: Shipment,
    pub owner_name: String,
    pub owner_rating: Option<f64>,
    pub owner_trips_completed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShipmentDetails {
    #[serde(flatten)]
    pub listing: ShipmentListing,
    pub cargo_type_name: String,
    pub vehicle_type_name: Option<String>,
    pub offer_count: i64,
    pub contract: Option<Contract>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub id: OfferId,
    pub shipment_id: ShipmentId,
    pub carrier_id: UserId,
    pub vehicle_id: Uuid,
    pub proposed_price: f64,
    pub proposed_pickup_time: Option<DateTime<Utc>>,
    pub proposed_delivery_time: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub id: ContractId,
    pub shipment_id: ShipmentId,
    pub offer_id: OfferId,
    pub shipper_id: UserId,
    pub carrier_id: UserId,
    pub final_price: f64,
    pub terms: Option<String>,
    pub notes: Option<String>,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Contract {
    pub fn is_party(&self, user_id: UserId) -> bool {
        self.shipper_id == user_id || self.carrier_id == user_id
    }

    /// The other side of the contract, or `None` if `user_id` is not a party.
    pub fn counterparty(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.shipper_id {
            Some(self.carrier_id)
        } else if user_id == self.carrier_id {
            Some(self.shipper_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub id: StatusUpdateId,
    pub contract_id: ContractId,
    pub status: TrackingStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub notes: Option<String>,
    pub recorded_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub id: ReviewId,
    pub reviewer_id: UserId,
    pub reviewed_user_id: UserId,
    pub contract_id: ContractId,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Request payloads

/// Distinguishes an absent field from an explicit `null` in partial updates.
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShipment {
    /// Only administrators may post on behalf of another shipper.
    #[serde(default)]
    pub owner_id: Option<UserId>,
    pub cargo_type_id: Uuid,
    #[serde(default)]
    pub cargo_description: Option<String>,
    pub weight_kg: f64,
    #[serde(default)]
    pub volume_m3: Option<f64>,
    pub pickup_location: String,
    pub pickup_time: DateTime<Utc>,
    pub delivery_location: String,
    pub delivery_time: DateTime<Utc>,
    #[serde(default)]
    pub vehicle_type_id: Option<Uuid>,
    #[serde(default)]
    pub price_offer: Option<f64>,
    #[serde(default)]
    pub status: Option<ShipmentStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipmentUpdate {
    pub cargo_type_id: Option<Uuid>,
    #[serde(default, deserialize_with = "double_option")]
    pub cargo_description: Option<Option<String>>,
    pub weight_kg: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    pub volume_m3: Option<Option<f64>>,
    pub pickup_location: Option<String>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub delivery_location: Option<String>,
    pub delivery_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option")]
    pub vehicle_type_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub price_offer: Option<Option<f64>>,
    pub status: Option<ShipmentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOffer {
    pub shipment_id: ShipmentId,
    /// Only administrators may propose on behalf of another carrier.
    #[serde(default)]
    pub carrier_id: Option<UserId>,
    pub vehicle_id: Uuid,
    pub proposed_price: f64,
    #[serde(default)]
    pub proposed_pickup_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub proposed_delivery_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferUpdate {
    pub vehicle_id: Option<Uuid>,
    pub proposed_price: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    pub proposed_pickup_time: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub proposed_delivery_time: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub message: Option<Option<String>>,
    pub status: Option<OfferStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferStatusChange {
    pub status: OfferStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContract {
    pub shipment_id: ShipmentId,
    pub offer_id: OfferId,
    pub final_price: f64,
    #[serde(default)]
    pub terms: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractUpdate {
    pub final_price: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    pub terms: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    pub status: Option<ContractStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStatusUpdate {
    pub contract_id: ContractId,
    pub status: TrackingStatus,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdateCorrection {
    pub status: Option<TrackingStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub latitude: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub longitude: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub reviewed_user_id: UserId,
    pub contract_id: ContractId,
    pub rating: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewUpdate {
    pub rating: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub comment: Option<Option<String>>,
}

// Validation

pub fn validate_price(field: &str, price: f64) -> Result<()> {
    if !price.is_finite() || price <= 0.0 {
        return Err(MarketError::Validation(format!("{} must be greater than 0", field)));
    }
    Ok(())
}

pub fn validate_rating(rating: i64) -> Result<()> {
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(MarketError::Validation(format!(
            "Rating must be an integer between {} and {}",
            MIN_RATING, MAX_RATING
        )));
    }
    Ok(())
}

pub fn validate_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> Result<()> {
    match (latitude, longitude) {
        (None, None) => Ok(()),
        (Some(lat), Some(lon)) => {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(MarketError::Validation(
                    "Latitude must be between -90 and 90".to_string(),
                ));
            }
            if !(-180.0..=180.0).contains(&lon) {
                return Err(MarketError::Validation(
                    "Longitude must be between -180 and 180".to_string(),
                ));
            }
            Ok(())
        }
        _ => Err(MarketError::Validation(
            "Latitude and longitude must be supplied together".to_string(),
        )),
    }
}

fn validate_location(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MarketError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn validate_window(pickup: DateTime<Utc>, delivery: DateTime<Utc>) -> Result<()> {
    if delivery < pickup {
        return Err(MarketError::Validation(
            "Delivery time must not precede pickup time".to_string(),
        ));
    }
    Ok(())
}

impl NewShipment {
    pub fn validate(&self) -> Result<()> {
        validate_price("Weight", self.weight_kg)?;
        if let Some(volume) = self.volume_m3 {
            validate_price("Volume", volume)?;
        }
        validate_location("Pickup location", &self.pickup_location)?;
        validate_location("Delivery location", &self.delivery_location)?;
        validate_window(self.pickup_time, self.delivery_time)?;
        if let Some(price) = self.price_offer {
            validate_price("Price offer", price)?;
        }
        if let Some(status) = self.status {
            if status != ShipmentStatus::Pending {
                return Err(MarketError::Validation(
                    "New shipments must start as 'pending'".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl ShipmentUpdate {
    /// Whether anything other than the status is being changed.
    pub fn has_terms(&self) -> bool {
        self.cargo_type_id.is_some()
            || self.cargo_description.is_some()
            || self.weight_kg.is_some()
            || self.volume_m3.is_some()
            || self.pickup_location.is_some()
            || self.pickup_time.is_some()
            || self.delivery_location.is_some()
            || self.delivery_time.is_some()
            || self.vehicle_type_id.is_some()
            || self.price_offer.is_some()
    }

    /// Applies the update to a copy of `current` and validates the result.
    /// Freight terms are frozen once the shipment leaves `pending`.
    pub fn apply(&self, current: &Shipment) -> Result<Shipment> {
        if self.has_terms() && current.status != ShipmentStatus::Pending {
            return Err(MarketError::Conflict(format!(
                "Shipment is '{}'; its terms can only change while pending",
                current.status
            )));
        }
        let mut next = current.clone();
        if let Some(id) = self.cargo_type_id {
            next.cargo_type_id = id;
        }
        if let Some(description) = &self.cargo_description {
            next.cargo_description = description.clone();
        }
        if let Some(weight) = self.weight_kg {
            validate_price("Weight", weight)?;
            next.weight_kg = weight;
        }
        if let Some(volume) = self.volume_m3 {
            if let Some(v) = volume {
                validate_price("Volume", v)?;
            }
            next.volume_m3 = volume;
        }
        if let Some(location) = &self.pickup_location {
            validate_location("Pickup location", location)?;
            next.pickup_location = location.clone();
        }
        if let Some(time) = self.pickup_time {
            next.pickup_time = time;
        }
        if let Some(location) = &self.delivery_location {
            validate_location("Delivery location", location)?;
            next.delivery_location = location.clone();
        }
        if let Some(time) = self.delivery_time {
            next.delivery_time = time;
        }
        validate_window(next.pickup_time, next.delivery_time)?;
        if let Some(vehicle_type) = self.vehicle_type_id {
            next.vehicle_type_id = vehicle_type;
        }
        if let Some(price) = self.price_offer {
            if let Some(p) = price {
                validate_price("Price offer", p)?;
            }
            next.price_offer = price;
        }
        if let Some(status) = self.status {
            if status != current.status {
                if status == ShipmentStatus::Active {
                    return Err(MarketError::Conflict(
                        "Shipments become active only by accepting an offer".to_string(),
                    ));
                }
                check_shipment_transition(current.status, status)?;
                next.status = status;
            }
        }
        Ok(next)
    }
}

impl NewOffer {
    pub fn validate(&self) -> Result<()> {
        validate_price("Proposed price", self.proposed_price)?;
        if let (Some(pickup), Some(delivery)) =
            (self.proposed_pickup_time, self.proposed_delivery_time)
        {
            validate_window(pickup, delivery)?;
        }
        Ok(())
    }
}

impl OfferUpdate {
    pub fn has_terms(&self) -> bool {
        self.vehicle_id.is_some()
            || self.proposed_price.is_some()
            || self.proposed_pickup_time.is_some()
            || self.proposed_delivery_time.is_some()
            || self.message.is_some()
    }

    /// Applies the term changes (never the status) to a copy of `current`.
    pub fn apply_terms(&self, current: &Offer) -> Result<Offer> {
        let mut next = current.clone();
        if let Some(vehicle_id) = self.vehicle_id {
            next.vehicle_id = vehicle_id;
        }
        if let Some(price) = self.proposed_price {
            validate_price("Proposed price", price)?;
            next.proposed_price = price;
        }
        if let Some(time) = self.proposed_pickup_time {
            next.proposed_pickup_time = time;
        }
        if let Some(time) = self.proposed_delivery_time {
            next.proposed_delivery_time = time;
        }
        if let Some(message) = &self.message {
            next.message = message.clone();
        }
        if let (Some(pickup), Some(delivery)) =
            (next.proposed_pickup_time, next.proposed_delivery_time)
        {
            validate_window(pickup, delivery)?;
        }
        Ok(next)
    }
}

impl NewContract {
    pub fn validate(&self) -> Result<()> {
        validate_price("Final price", self.final_price)
    }
}

impl NewStatusUpdate {
    pub fn validate(&self) -> Result<()> {
        validate_coordinates(self.latitude, self.longitude)
    }
}

impl NewReview {
    pub fn validate(&self, reviewer_id: UserId) -> Result<()> {
        if reviewer_id == self.reviewed_user_id {
            return Err(MarketError::Validation("Users cannot review themselves".to_string()));
        }
        validate_rating(self.rating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_shipment() -> Shipment {
        let now = Utc::now();
        Shipment {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            cargo_type_id: Uuid::new_v4(),
            cargo_description: None,
            weight_kg: 1200.0,
            volume_m3: None,
            pickup_location: "Rotterdam".to_string(),
            pickup_time: now,
            delivery_location: "Hamburg".to_string(),
            delivery_time: now + Duration::days(2),
            vehicle_type_id: None,
            price_offer: None,
            status: ShipmentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_names_round_trip_through_strings() {
        for status in ShipmentStatus::ALL {
            assert_eq!(status.as_str().parse::<ShipmentStatus>().unwrap(), *status);
        }
        for status in TrackingStatus::ALL {
            assert_eq!(status.as_str().parse::<TrackingStatus>().unwrap(), *status);
        }
        assert!("reopened".parse::<ContractStatus>().is_err());
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&TrackingStatus::IssueReported).unwrap();
        assert_eq!(json, "\"issue_reported\"");
        let parsed: ShipmentStatus = serde_json::from_str("\"in_transit\"").unwrap();
        assert_eq!(parsed, ShipmentStatus::InTransit);
    }

    #[test]
    fn delivered_shipment_cannot_reopen() {
        assert!(ShipmentStatus::Delivered.is_terminal());
        assert!(check_shipment_transition(ShipmentStatus::Delivered, ShipmentStatus::Pending).is_err());
        assert!(check_shipment_transition(ShipmentStatus::Active, ShipmentStatus::InTransit).is_ok());
    }

    #[test]
    fn accepted_offer_is_final() {
        assert!(OfferStatus::Accepted.is_terminal());
        for next in OfferStatus::ALL {
            assert!(!OfferStatus::Accepted.can_transition_to(*next));
        }
        assert!(OfferStatus::Pending.can_transition_to(OfferStatus::Accepted));
        assert!(!OfferStatus::Countered.can_transition_to(OfferStatus::Accepted));
    }

    #[test]
    fn contract_transitions_and_effects() {
        assert!(ContractStatus::Active.can_transition_to(ContractStatus::Disputed));
        assert!(ContractStatus::Disputed.can_transition_to(ContractStatus::Completed));
        assert!(ContractStatus::Completed.is_terminal());
        assert_eq!(
            ContractStatus::Completed.shipment_effect(),
            Some(ShipmentStatus::Delivered)
        );
        assert!(!ContractStatus::Cancelled.accepts_tracking());
    }

    #[test]
    fn rating_boundaries() {
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(1).is_ok());
        assert!(validate_rating(10).is_ok());
        assert!(validate_rating(11).is_err());
    }

    #[test]
    fn coordinates_must_be_real_world() {
        assert!(validate_coordinates(None, None).is_ok());
        assert!(validate_coordinates(Some(51.9), Some(4.5)).is_ok());
        assert!(validate_coordinates(Some(-90.0), Some(180.0)).is_ok());
        assert!(validate_coordinates(Some(90.1), Some(0.0)).is_err());
        assert!(validate_coordinates(Some(0.0), Some(-180.5)).is_err());
        assert!(validate_coordinates(Some(10.0), None).is_err());
    }

    #[test]
    fn shipment_update_rejects_manual_activation() {
        let shipment = sample_shipment();
        let update = ShipmentUpdate {
            status: Some(ShipmentStatus::Active),
            ..Default::default()
        };
        assert!(matches!(update.apply(&shipment), Err(MarketError::Conflict(_))));
    }

    #[test]
    fn shipment_update_can_clear_price() {
        let mut shipment = sample_shipment();
        shipment.price_offer = Some(900.0);
        let update: ShipmentUpdate = serde_json::from_str(r#"{"price_offer": null}"#).unwrap();
        let next = update.apply(&shipment).unwrap();
        assert_eq!(next.price_offer, None);

        let untouched: ShipmentUpdate = serde_json::from_str(r#"{"weight_kg": 50.0}"#).unwrap();
        let next = untouched.apply(&shipment).unwrap();
        assert_eq!(next.price_offer, Some(900.0));
        assert_eq!(next.weight_kg, 50.0);
    }

    #[test]
    fn shipment_update_rejects_inverted_window() {
        let shipment = sample_shipment();
        let update = ShipmentUpdate {
            delivery_time: Some(shipment.pickup_time - Duration::hours(1)),
            ..Default::default()
        };
        assert!(update.apply(&shipment).is_err());
    }

    #[test]
    fn shipment_terms_are_frozen_after_pending() {
        let mut shipment = sample_shipment();
        shipment.status = ShipmentStatus::Active;

        let reroute = ShipmentUpdate {
            delivery_location: Some("Munich".to_string()),
            ..Default::default()
        };
        assert!(matches!(reroute.apply(&shipment), Err(MarketError::Conflict(_))));

        let cleared: ShipmentUpdate = serde_json::from_str(r#"{"price_offer": null}"#).unwrap();
        assert!(cleared.has_terms());
        assert!(matches!(cleared.apply(&shipment), Err(MarketError::Conflict(_))));

        let cancel = ShipmentUpdate {
            status: Some(ShipmentStatus::Cancelled),
            ..Default::default()
        };
        assert!(!cancel.has_terms());
        assert_eq!(cancel.apply(&shipment).unwrap().status, ShipmentStatus::Cancelled);
    }

    #[test]
    fn self_review_is_rejected() {
        let user = Uuid::new_v4();
        let review = NewReview {
            reviewed_user_id: user,
            contract_id: Uuid::new_v4(),
            rating: 8,
            comment: None,
        };
        assert!(review.validate(user).is_err());
        assert!(review.validate(Uuid::new_v4()).is_ok());
    }
}
