use crate::error::StoreError;
use crate::models::{MaterialRecord, MaterialUpdate};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Bookkeeping store for material records, keyed by material id.
/// `update_fields` applies only the fields present in the update and
/// refreshes `updated_at`.
#[async_trait]
pub trait MaterialStore: Send + Sync {
    async fn put(&self, record: MaterialRecord) -> Result<(), StoreError>;

    async fn get(&self, material_id: &str) -> Result<Option<MaterialRecord>, StoreError>;

    async fn update_fields(
        &self,
        material_id: &str,
        update: MaterialUpdate,
    ) -> Result<(), StoreError>;

    async fn remove(&self, material_id: &str) -> Result<(), StoreError>;
}

fn apply_update(record: &mut MaterialRecord, update: MaterialUpdate) {
    if let Some(status) = update.status {
        record.status = status;
    }
    if let Some(progress) = update.progress {
        record.processing_status.progress = progress;
    }
    if let Some(started_at) = update.started_at {
        record.processing_status.started_at = Some(started_at);
    }
    if let Some(completed_at) = update.completed_at {
        record.processing_status.completed_at = Some(completed_at);
    }
    if let Some(error_message) = update.error_message {
        record.processing_status.error_message = Some(error_message);
    }
    if let Some(chunk_count) = update.chunk_count {
        record.chunk_count = chunk_count;
    }
    if let Some(vector_ids) = update.vector_ids {
        record.vector_ids = vector_ids;
    }
    record.updated_at = Utc::now();
}

#[derive(Default)]
pub struct InMemoryMaterialStore {
    records: Mutex<HashMap<String, MaterialRecord>>,
}

impl InMemoryMaterialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MaterialStore for InMemoryMaterialStore {
    async fn put(&self, record: MaterialRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .expect("material store lock")
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, material_id: &str) -> Result<Option<MaterialRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .expect("material store lock")
            .get(material_id)
            .cloned())
    }

    async fn update_fields(
        &self,
        material_id: &str,
        update: MaterialUpdate,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("material store lock");
        let record = records
            .get_mut(material_id)
            .ok_or_else(|| StoreError::Request(format!("unknown material: {material_id}")))?;
        apply_update(record, update);
        Ok(())
    }

    async fn remove(&self, material_id: &str) -> Result<(), StoreError> {
        self.records
            .lock()
            .expect("material store lock")
            .remove(material_id);
        Ok(())
    }
}

/// One JSON document per material under a state directory. Good enough
/// for the CLI; swap in a real document store behind the same trait for
/// anything multi-process.
pub struct JsonFileMaterialStore {
    dir: PathBuf,
}

impl JsonFileMaterialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, material_id: &str) -> PathBuf {
        self.dir.join(format!("{material_id}.json"))
    }

    async fn load(&self, material_id: &str) -> Result<Option<MaterialRecord>, StoreError> {
        let path = self.path_for(material_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn save(&self, record: &MaterialRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(self.path_for(&record.id), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl MaterialStore for JsonFileMaterialStore {
    async fn put(&self, record: MaterialRecord) -> Result<(), StoreError> {
        self.save(&record).await
    }

    async fn get(&self, material_id: &str) -> Result<Option<MaterialRecord>, StoreError> {
        self.load(material_id).await
    }

    async fn update_fields(
        &self,
        material_id: &str,
        update: MaterialUpdate,
    ) -> Result<(), StoreError> {
        let mut record = self
            .load(material_id)
            .await?
            .ok_or_else(|| StoreError::Request(format!("unknown material: {material_id}")))?;
        apply_update(&mut record, update);
        self.save(&record).await
    }

    async fn remove(&self, material_id: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(material_id)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    #[tokio::test]
    async fn partial_update_leaves_other_fields_alone() {
        let store = InMemoryMaterialStore::new();
        let mut record = MaterialRecord::new("m1", "Lecture 1", "pdf");
        record.course_id = Some("ds101".to_string());
        store.put(record).await.unwrap();

        store
            .update_fields(
                "m1",
                MaterialUpdate {
                    status: Some(JobStatus::Processing),
                    progress: Some(0.3),
                    ..MaterialUpdate::default()
                },
            )
            .await
            .unwrap();

        let loaded = store.get("m1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.processing_status.progress, 0.3);
        assert_eq!(loaded.course_id.as_deref(), Some("ds101"));
        assert_eq!(loaded.title, "Lecture 1");
    }

    #[tokio::test]
    async fn updating_missing_material_is_an_error() {
        let store = InMemoryMaterialStore::new();
        let error = store
            .update_fields("nope", MaterialUpdate::progress(0.5))
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::Request(_)));
    }

    #[tokio::test]
    async fn json_store_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMaterialStore::new(dir.path());

        let mut record = MaterialRecord::new("m2", "Notebook week 3", "ipynb");
        record.chunk_count = 12;
        store.put(record).await.unwrap();

        store
            .update_fields(
                "m2",
                MaterialUpdate {
                    status: Some(JobStatus::Completed),
                    progress: Some(1.0),
                    vector_ids: Some(vec!["v1".to_string(), "v2".to_string()]),
                    ..MaterialUpdate::default()
                },
            )
            .await
            .unwrap();

        let loaded = store.get("m2").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.processing_status.progress, 1.0);
        assert_eq!(loaded.vector_ids, vec!["v1", "v2"]);
        assert_eq!(loaded.chunk_count, 12);

        store.remove("m2").await.unwrap();
        assert!(store.get("m2").await.unwrap().is_none());
    }
}
