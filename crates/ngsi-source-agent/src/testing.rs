//! In-memory broker used by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ngsi_source_adapter_ngsi::{
    ClientError, Connector, ContextBroker, EntityPage, EntityQuery, SubscriptionRequest,
};
use ngsi_source_core::{AttrsFormat, SourceConfig};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Default)]
pub struct FakeBroker {
    total: u64,
    next_id: AtomicU64,
    list_offsets: Mutex<Vec<u32>>,
    fail_listing_at: Mutex<Option<u32>>,
    fail_create: Mutex<bool>,
    fail_update: Mutex<bool>,
    list_gate: Mutex<Option<Arc<Semaphore>>>,
    create_gate: Mutex<Option<Arc<Semaphore>>>,
    created: Mutex<Vec<(String, SubscriptionRequest)>>,
    updated: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeBroker {
    pub fn with_entities(total: u64) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn fail_listing_at(&self, offset: u32) {
        *self.fail_listing_at.lock().unwrap() = Some(offset);
    }

    pub fn fail_create(&self) {
        *self.fail_create.lock().unwrap() = true;
    }

    /// Refuse every renewal. Attempts are still recorded in `updated`.
    pub fn fail_update(&self) {
        *self.fail_update.lock().unwrap() = true;
    }

    /// Hold every page request until a permit is added.
    pub fn gate_listing(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.list_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Hold every subscription creation until a permit is added.
    pub fn gate_create(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.create_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn list_offsets(&self) -> Vec<u32> {
        self.list_offsets.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<(String, SubscriptionRequest)> {
        self.created.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<String> {
        self.updated.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Subscriptions created and not deleted.
    pub fn live_subscriptions(&self) -> Vec<String> {
        let deleted: HashSet<_> = self.deleted().into_iter().collect();
        self.created()
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| !deleted.contains(id))
            .collect()
    }

    fn entity(index: u64, format: AttrsFormat) -> Value {
        match format {
            AttrsFormat::KeyValues => json!({
                "id": format!("urn:Room:{index}"),
                "type": "Room",
                "temperature": 21,
            }),
            AttrsFormat::Normalized => json!({
                "id": format!("urn:Room:{index}"),
                "type": "Room",
                "temperature": {"type": "Number", "value": 21, "metadata": {}},
            }),
        }
    }
}

async fn pass_gate(gate: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = gate.lock().unwrap().clone();
    if let Some(gate) = gate {
        gate.acquire().await.unwrap().forget();
    }
}

#[async_trait]
impl ContextBroker for FakeBroker {
    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<String, ClientError> {
        pass_gate(&self.create_gate).await;

        if *self.fail_create.lock().unwrap() {
            return Err(ClientError::Connection("connection refused".to_string()));
        }

        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.created
            .lock()
            .unwrap()
            .push((id.clone(), request.clone()));
        Ok(id)
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        _expires: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        self.updated
            .lock()
            .unwrap()
            .push(subscription_id.to_string());

        if *self.fail_update.lock().unwrap() {
            return Err(ClientError::ApiError {
                status: 404,
                message: "The requested subscription has not been found".to_string(),
            });
        }
        Ok(())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<(), ClientError> {
        self.deleted
            .lock()
            .unwrap()
            .push(subscription_id.to_string());
        Ok(())
    }

    async fn list_entities(&self, query: &EntityQuery) -> Result<EntityPage, ClientError> {
        self.list_offsets.lock().unwrap().push(query.offset);

        pass_gate(&self.list_gate).await;

        if *self.fail_listing_at.lock().unwrap() == Some(query.offset) {
            return Err(ClientError::ApiError {
                status: 400,
                message: "Invalid query".to_string(),
            });
        }

        let start = u64::from(query.offset).min(self.total);
        let end = (start + u64::from(query.limit)).min(self.total);
        let results = (start..end)
            .map(|index| Self::entity(index, query.attrs_format))
            .collect();

        Ok(EntityPage {
            results,
            count: Some(self.total),
        })
    }
}

pub struct FakeConnector(pub Arc<FakeBroker>);

impl Connector for FakeConnector {
    fn connect(&self, _config: &SourceConfig) -> Result<Arc<dyn ContextBroker>, ClientError> {
        Ok(self.0.clone())
    }
}
