//! The generic typed wrapper over the engine's four operations.
//!
//! Every domain service is the same mechanical adapter: serialize the
//! entity into a record payload, run domain validation, call the broker,
//! decode records back. `EntityService<E>` implements that once; the entity
//! modules only contribute their types, validation rules, and derived-field
//! helpers. Services never bypass the broker, so every write is observed by
//! subscribers.

use std::marker::PhantomData;
use std::sync::Arc;

use bahi_core::{Document, RecordId, SyncedRecord, Table, Timestamp};
use bahi_sync_engine::{
    BatchConfirmation, Confirmation, CreateOptions, SubscriptionHandle, Subscriber, SyncEngine,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{ServiceError, ServiceResult};

/// A domain entity stored in one synchronized table.
pub trait LedgerEntity:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// The table backing this entity.
    const TABLE: Table;

    /// Domain validation applied before any write is accepted.
    fn validate(&self) -> ServiceResult<()> {
        Ok(())
    }
}

/// A decoded record: the sync columns plus the typed entity data.
#[derive(Debug, Clone, PartialEq)]
pub struct Synced<E> {
    /// Record identifier.
    pub id: RecordId,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last modification instant.
    pub updated_at: Timestamp,
    /// Last confirmation instant; `None` while unconfirmed.
    pub synced_at: Option<Timestamp>,
    /// The decoded entity.
    pub data: E,
}

/// Serializes an entity into a record payload.
pub(crate) fn to_document<E: LedgerEntity>(entity: &E) -> ServiceResult<Document> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ServiceError::Encode(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(err) => Err(ServiceError::Encode(err.to_string())),
    }
}

/// Decodes a record into the typed shape.
pub(crate) fn from_record<E: LedgerEntity>(record: &SyncedRecord) -> ServiceResult<Synced<E>> {
    let data = serde_json::from_value(Value::Object(record.fields.clone()))
        .map_err(|err| ServiceError::Decode(err.to_string()))?;
    Ok(Synced {
        id: record.id,
        created_at: record.created_at,
        updated_at: record.updated_at,
        synced_at: record.synced_at,
        data,
    })
}

/// An accepted typed write: the optimistic value plus its confirmation.
#[derive(Debug)]
pub struct TypedWrite<E> {
    /// The optimistic typed record.
    pub record: Synced<E>,
    confirmation: Confirmation,
}

impl<E: LedgerEntity> TypedWrite<E> {
    /// Waits for the authoritative outcome.
    pub async fn confirmed(self) -> ServiceResult<Synced<E>> {
        let record = self.confirmation.wait().await?;
        from_record(&record)
    }
}

/// An accepted typed batch create.
#[derive(Debug)]
pub struct TypedBatch<E> {
    /// Per-item optimistic outcomes, in input order.
    pub records: Vec<ServiceResult<Synced<E>>>,
    /// `Some(err)` for items that never reached the engine.
    skipped: Vec<Option<ServiceError>>,
    confirmation: BatchConfirmation,
}

impl<E: LedgerEntity> TypedBatch<E> {
    /// Waits for the per-item final outcomes, in input order.
    pub async fn confirmed(self) -> Vec<ServiceResult<Synced<E>>> {
        let mut engine_outcomes = self.confirmation.wait().await.into_iter();
        self.skipped
            .into_iter()
            .map(|slot| match slot {
                Some(err) => Err(err),
                None => match engine_outcomes.next() {
                    Some(Ok(record)) => from_record(&record),
                    Some(Err(err)) => Err(err.into()),
                    None => Err(ServiceError::Engine(
                        bahi_sync_engine::EngineError::transient_fatal(
                            "batch confirmation dropped",
                        ),
                    )),
                },
            })
            .collect()
    }
}

/// Typed per-kind callbacks for a subscription.
pub struct TypedSubscriber<E> {
    insert: Option<Arc<dyn Fn(Synced<E>) + Send + Sync>>,
    update: Option<Arc<dyn Fn(Synced<E>) + Send + Sync>>,
    delete: Option<Arc<dyn Fn(Synced<E>) + Send + Sync>>,
}

impl<E: LedgerEntity> TypedSubscriber<E> {
    /// Creates a subscriber with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            insert: None,
            update: None,
            delete: None,
        }
    }

    /// Sets the insert callback.
    #[must_use]
    pub fn on_insert(mut self, f: impl Fn(Synced<E>) + Send + Sync + 'static) -> Self {
        self.insert = Some(Arc::new(f));
        self
    }

    /// Sets the update callback.
    #[must_use]
    pub fn on_update(mut self, f: impl Fn(Synced<E>) + Send + Sync + 'static) -> Self {
        self.update = Some(Arc::new(f));
        self
    }

    /// Sets the delete callback. Receives the decoded tombstoned image.
    #[must_use]
    pub fn on_delete(mut self, f: impl Fn(Synced<E>) + Send + Sync + 'static) -> Self {
        self.delete = Some(Arc::new(f));
        self
    }
}

/// The mechanical typed wrapper shared by every domain service.
pub struct EntityService<E: LedgerEntity> {
    engine: Arc<SyncEngine>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: LedgerEntity> Clone for EntityService<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            _entity: PhantomData,
        }
    }
}

impl<E: LedgerEntity> std::fmt::Debug for EntityService<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityService")
            .field("table", &E::TABLE)
            .finish()
    }
}

impl<E: LedgerEntity> EntityService<E> {
    /// Creates a service over a shared engine instance.
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            _entity: PhantomData,
        }
    }

    /// The backing table.
    #[must_use]
    pub fn table(&self) -> Table {
        E::TABLE
    }

    /// Creates an entity.
    pub async fn create(&self, entity: E) -> ServiceResult<TypedWrite<E>> {
        entity.validate()?;
        let payload = to_document(&entity)?;
        let pending = self
            .engine
            .create(E::TABLE, payload, CreateOptions::default())
            .await?;
        Ok(TypedWrite {
            record: from_record(&pending.record)?,
            confirmation: pending.confirmation,
        })
    }

    /// Overwrites an entity's fields.
    pub async fn update(&self, id: RecordId, entity: E) -> ServiceResult<TypedWrite<E>> {
        entity.validate()?;
        let patch = to_document(&entity)?;
        let pending = self.engine.update(E::TABLE, id, patch).await?;
        Ok(TypedWrite {
            record: from_record(&pending.record)?,
            confirmation: pending.confirmation,
        })
    }

    /// Soft-deletes an entity.
    pub async fn delete(&self, id: RecordId) -> ServiceResult<TypedWrite<E>> {
        let pending = self.engine.delete(E::TABLE, id).await?;
        Ok(TypedWrite {
            record: from_record(&pending.record)?,
            confirmation: pending.confirmation,
        })
    }

    /// Creates several entities at once; per-item outcomes, in input order.
    pub async fn batch_create(&self, entities: Vec<E>) -> ServiceResult<TypedBatch<E>> {
        let mut payloads = Vec::new();
        let mut skipped = Vec::with_capacity(entities.len());
        for entity in &entities {
            match entity.validate().and_then(|()| to_document(entity)) {
                Ok(payload) => {
                    payloads.push(payload);
                    skipped.push(None);
                }
                Err(err) => skipped.push(Some(err)),
            }
        }

        let batch = self.engine.batch_create(E::TABLE, payloads).await?;
        let mut engine_records = batch.records.into_iter();
        let records = skipped
            .iter()
            .map(|slot| match slot {
                Some(err) => Err(err.clone()),
                None => match engine_records.next() {
                    Some(Ok(record)) => from_record(&record),
                    Some(Err(err)) => Err(err.into()),
                    None => Err(ServiceError::Encode("batch result misaligned".into())),
                },
            })
            .collect();

        Ok(TypedBatch {
            records,
            skipped,
            confirmation: batch.confirmation,
        })
    }

    /// Returns all live entities.
    ///
    /// Records that no longer decode into the entity type (e.g. written by
    /// a newer app version) are skipped with a warning rather than failing
    /// the whole read.
    pub fn fetch(&self) -> ServiceResult<Vec<Synced<E>>> {
        let records = self.engine.fetch(E::TABLE)?;
        Ok(records
            .iter()
            .filter_map(|record| match from_record(record) {
                Ok(synced) => Some(synced),
                Err(err) => {
                    warn!(table = %E::TABLE, record = %record.id, error = %err, "skipping undecodable record");
                    None
                }
            })
            .collect())
    }

    /// Returns one live entity.
    pub fn fetch_by_id(&self, id: RecordId) -> ServiceResult<Option<Synced<E>>> {
        match self.engine.fetch_by_id(E::TABLE, id)? {
            Some(record) => Ok(Some(from_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Subscribes to typed change notifications for this entity's table.
    pub async fn subscribe(
        &self,
        subscriber: TypedSubscriber<E>,
    ) -> ServiceResult<SubscriptionHandle> {
        let mut inner = Subscriber::new();
        if let Some(f) = subscriber.insert {
            inner = inner.on_insert(move |record| decode_and_call::<E>(record, &f));
        }
        if let Some(f) = subscriber.update {
            inner = inner.on_update(move |record| decode_and_call::<E>(record, &f));
        }
        if let Some(f) = subscriber.delete {
            inner = inner.on_delete(move |record| decode_and_call::<E>(record, &f));
        }
        Ok(self.engine.subscribe(E::TABLE, inner).await?)
    }
}

fn decode_and_call<E: LedgerEntity>(record: &SyncedRecord, f: &Arc<dyn Fn(Synced<E>) + Send + Sync>) {
    match from_record::<E>(record) {
        Ok(synced) => f(synced),
        Err(err) => {
            warn!(table = %E::TABLE, record = %record.id, error = %err, "dropping undecodable notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bahi_core::OwnerId;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
    }

    impl LedgerEntity for Widget {
        const TABLE: Table = Table::new("widgets");

        fn validate(&self) -> ServiceResult<()> {
            if self.name.is_empty() {
                return Err(ServiceError::invalid("name must not be empty"));
            }
            Ok(())
        }
    }

    #[test]
    fn entity_roundtrips_through_a_record() {
        let widget = Widget {
            name: "gear".into(),
        };
        let payload = to_document(&widget).unwrap();
        let record = SyncedRecord::new(
            RecordId::generate(),
            OwnerId::new("u1"),
            Timestamp::from_millis(10),
            payload,
        );

        let synced: Synced<Widget> = from_record(&record).unwrap();
        assert_eq!(synced.data, widget);
        assert_eq!(synced.id, record.id);
        assert_eq!(synced.synced_at, None);
    }

    #[test]
    fn decode_failure_is_reported() {
        let record = SyncedRecord::new(
            RecordId::generate(),
            OwnerId::new("u1"),
            Timestamp::from_millis(10),
            Document::new(),
        );
        let result: ServiceResult<Synced<Widget>> = from_record(&record);
        assert!(matches!(result, Err(ServiceError::Decode(_))));
    }
}
