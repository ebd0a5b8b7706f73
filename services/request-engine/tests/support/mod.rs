//! Shared wiring for the lifecycle tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ledger::CreditLedger;
use notifier::{ChannelRegistry, NotificationDispatcher, RegistryConfig};
use persistence::{MemoryStore, RecordingInvalidator, Store};
use request_engine::{CreateRequest, RequestEngine};
use types::ids::{PackageId, ServiceTypeId, UserId};
use types::request::{Actor, Request};
use types::service::{PriorityCostTable, ServiceType};
use types::subscription::Package;
use types::Credits;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub ledger: CreditLedger,
    pub registry: ChannelRegistry,
    pub dispatcher: NotificationDispatcher,
    pub engine: RequestEngine,
    pub cache: Arc<RecordingInvalidator>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(RecordingInvalidator::new());
        let ledger = CreditLedger::new(store.clone(), cache.clone());
        let registry = ChannelRegistry::new(RegistryConfig {
            heartbeat_interval: Duration::from_secs(300),
        });
        let dispatcher = NotificationDispatcher::new(store.clone(), registry.clone());
        let engine = RequestEngine::new(
            store.clone(),
            ledger.clone(),
            dispatcher.clone(),
            cache.clone(),
        );
        Self {
            store,
            ledger,
            registry,
            dispatcher,
            engine,
            cache,
        }
    }

    /// Seed a package and return it.
    pub async fn package(
        &self,
        credits: Credits,
        max_free_revisions: u32,
        paid_revision_unit_cost: Credits,
    ) -> Package {
        let package = Package {
            id: PackageId::new(),
            name: "Test package".to_string(),
            credits,
            duration_days: 30,
            max_free_revisions,
            paid_revision_unit_cost,
            is_free: false,
            is_active: true,
        };
        self.store.insert_package(package.clone()).await.unwrap();
        package
    }

    /// Seed a service with the default surcharge table and no questions.
    pub async fn service(&self, base_credit_cost: Credits) -> ServiceType {
        let service = ServiceType {
            id: ServiceTypeId::new(),
            name: "Test service".to_string(),
            base_credit_cost,
            priority_costs: PriorityCostTable::default(),
            attributes: vec![],
            is_active: true,
        };
        self.store.insert_service_type(service.clone()).await.unwrap();
        service
    }

    /// Register a client with an active subscription to `package`.
    pub async fn client_with_subscription(&self, package: &Package) -> Actor {
        let client = Actor::client(UserId::new());
        self.ledger
            .grant(client.user_id, package, Utc::now())
            .await
            .unwrap();
        client
    }

    pub async fn remaining_credits(&self, client: Actor) -> Credits {
        self.ledger
            .get_active(client.user_id, Utc::now())
            .await
            .unwrap()
            .expect("active subscription")
            .remaining_credits
    }

    /// Create a medium-priority request with no answers.
    pub async fn create_medium(&self, client: Actor, service: &ServiceType) -> Request {
        self.engine
            .create(
                client,
                CreateRequest {
                    service_type_id: service.id,
                    priority_level: 2,
                    attribute_responses: vec![],
                },
            )
            .await
            .unwrap()
    }

    /// Walk a fresh request to DELIVERED; returns (request, provider).
    pub async fn delivered_request(
        &self,
        client: Actor,
        service: &ServiceType,
    ) -> (Request, Actor) {
        let provider = Actor::provider(UserId::new());
        let request = self.create_medium(client, service).await;
        self.engine.claim(provider, request.id).await.unwrap();
        self.engine.start(provider, request.id).await.unwrap();
        let request = self.engine.deliver(provider, request.id).await.unwrap();
        (request, provider)
    }
}
