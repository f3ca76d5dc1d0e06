#![allow(dead_code)]

use chrono::{Duration, Utc};
use haulage::{
    identity::Vehicle,
    model::{ContractUpdate, NewOffer, NewShipment, User},
    Caller, Contract, ContractService, ContractStatus, Database, IdentityService, Offer,
    OfferService, OfferStatus, ReviewService, Role, Shipment, ShipmentService, StatusTracker,
};
use tempfile::NamedTempFile;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789";

/// A marketplace on a throwaway SQLite file with one shipper, two carriers
/// (one truck each) and an administrator.
pub struct Market {
    _db_file: NamedTempFile,
    pub db: Database,
    pub identity: IdentityService,
    pub shipments: ShipmentService,
    pub offers: OfferService,
    pub contracts: ContractService,
    pub tracker: StatusTracker,
    pub reviews: ReviewService,
    pub cargo_type: Uuid,
    pub vehicle_type: Uuid,
    pub shipper: User,
    pub carrier_a: User,
    pub carrier_b: User,
    pub admin: User,
    pub truck_a: Vehicle,
    pub truck_b: Vehicle,
}

impl Market {
    pub async fn new() -> Market {
        let db_file = NamedTempFile::new().unwrap();
        let url = format!("sqlite://{}", db_file.path().to_string_lossy());
        let db = Database::new(&url).await.unwrap();

        let identity = IdentityService::new(&db);
        let cargo_type = identity.register_cargo_type("Palletised goods").await.unwrap();
        let vehicle_type = identity.register_vehicle_type("Curtainsider").await.unwrap();

        let shipper = register(&identity, "Acme Exports", Role::Shipper).await;
        let carrier_a = register(&identity, "Alpha Haulage", Role::Carrier).await;
        let carrier_b = register(&identity, "Bravo Logistics", Role::Carrier).await;
        let admin = register(&identity, "Ops Desk", Role::Admin).await;

        let truck_a = identity
            .register_vehicle(carrier_a.id, vehicle_type, "AL-100")
            .await
            .unwrap();
        let truck_b = identity
            .register_vehicle(carrier_b.id, vehicle_type, "BR-200")
            .await
            .unwrap();

        Market {
            shipments: ShipmentService::new(&db),
            offers: OfferService::new(&db),
            contracts: ContractService::new(&db),
            tracker: StatusTracker::new(&db),
            reviews: ReviewService::new(&db),
            _db_file: db_file,
            db,
            identity,
            cargo_type,
            vehicle_type,
            shipper,
            carrier_a,
            carrier_b,
            admin,
            truck_a,
            truck_b,
        }
    }

    pub fn as_user(&self, user: &User) -> Caller {
        Caller::new(user.id, user.role)
    }

    pub fn new_shipment(&self) -> NewShipment {
        let pickup = Utc::now() + Duration::days(1);
        NewShipment {
            owner_id: None,
            cargo_type_id: self.cargo_type,
            cargo_description: Some("22 pallets of ceramic tiles".to_string()),
            weight_kg: 9_500.0,
            volume_m3: Some(40.0),
            pickup_location: "Rotterdam, NL".to_string(),
            pickup_time: pickup,
            delivery_location: "Munich, DE".to_string(),
            delivery_time: pickup + Duration::days(2),
            vehicle_type_id: Some(self.vehicle_type),
            price_offer: Some(550.0),
            status: None,
        }
    }

    pub async fn post_shipment(&self) -> Shipment {
        self.shipments
            .create(&self.as_user(&self.shipper), self.new_shipment())
            .await
            .unwrap()
    }

    pub fn new_offer(&self, shipment: &Shipment, vehicle: &Vehicle, price: f64) -> NewOffer {
        NewOffer {
            shipment_id: shipment.id,
            carrier_id: None,
            vehicle_id: vehicle.id,
            proposed_price: price,
            proposed_pickup_time: None,
            proposed_delivery_time: None,
            message: None,
        }
    }

    pub async fn offer(&self, shipment: &Shipment, carrier: &User, vehicle: &Vehicle, price: f64) -> Offer {
        self.offers
            .create(&self.as_user(carrier), self.new_offer(shipment, vehicle, price))
            .await
            .unwrap()
    }

    /// Posts a shipment, has carrier A win it and completes the contract.
    pub async fn completed_contract(&self) -> Contract {
        let shipment = self.post_shipment().await;
        let offer = self.offer(&shipment, &self.carrier_a, &self.truck_a, 480.0).await;
        let resolution = self
            .offers
            .update_status(&self.as_user(&self.shipper), offer.id, OfferStatus::Accepted)
            .await
            .unwrap();
        let contract = resolution.contract.unwrap();

        self.contracts
            .update(
                &self.as_user(&self.shipper),
                contract.id,
                ContractUpdate {
                    status: Some(ContractStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }
}

async fn register(identity: &IdentityService, name: &str, role: Role) -> User {
    let email = format!("{}@example.test", Uuid::new_v4().simple());
    identity.register_user(name, &email, role).await.unwrap()
}
