use std::path::PathBuf;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sketchroom_shared::{decode_snapshot_file, encode_snapshot_file, Snapshot};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;

/// Backing store for named snapshots. Implementations only move records in
/// and out; ids and timestamps are assigned by the HTTP layer.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Snapshot, StoreError>;
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
    /// Like `save`, but only for a snapshot that still exists. Fails with
    /// `NotFound` if it was removed in the meantime.
    async fn update(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
    async fn remove(&self, id: &str) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<Snapshot>, StoreError>;
}

/// Snapshot ids are UUIDs; anything else cannot name a stored record.
pub fn normalize_snapshot_id(value: &str) -> Option<String> {
    let parsed = Uuid::parse_str(value).ok()?;
    Some(parsed.to_string())
}

pub fn new_snapshot_id() -> String {
    Uuid::now_v7().to_string()
}

fn checked_id(id: &str) -> Result<String, StoreError> {
    normalize_snapshot_id(id).ok_or_else(|| StoreError::NotFound(id.to_string()))
}

fn decode(id: &str, payload: &[u8]) -> Result<Snapshot, StoreError> {
    decode_snapshot_file(payload).map_err(|source| StoreError::Decode {
        id: id.to_string(),
        source,
    })
}

fn sort_snapshots(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// One `<id>.bin` file per snapshot. Writes and removals are serialized so
/// an update never recreates a file removed after it was loaded.
pub struct FileStore {
    snapshot_dir: PathBuf,
    writes: Mutex<()>,
}

impl FileStore {
    pub async fn open(snapshot_dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&snapshot_dir).await?;
        Ok(Self {
            snapshot_dir,
            writes: Mutex::new(()),
        })
    }

    fn path(&self, id: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{id}.bin"))
    }

    async fn write(&self, id: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        let tmp = self.snapshot_dir.join(format!("{id}.bin.tmp"));
        tokio::fs::write(&tmp, encode_snapshot_file(snapshot)).await?;
        tokio::fs::rename(&tmp, self.path(id)).await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn load(&self, id: &str) -> Result<Snapshot, StoreError> {
        let id = checked_id(id)?;
        let payload = match tokio::fs::read(self.path(&id)).await {
            Ok(payload) => payload,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id));
            }
            Err(error) => return Err(error.into()),
        };
        decode(&id, &payload)
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let id = checked_id(&snapshot.id)?;
        let _guard = self.writes.lock().await;
        self.write(&id, snapshot).await
    }

    async fn update(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let id = checked_id(&snapshot.id)?;
        let _guard = self.writes.lock().await;
        if !tokio::fs::try_exists(self.path(&id)).await? {
            return Err(StoreError::NotFound(id));
        }
        self.write(&id, snapshot).await
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let id = checked_id(id)?;
        let _guard = self.writes.lock().await;
        match tokio::fs::remove_file(self.path(&id)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Snapshot>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.snapshot_dir).await?;
        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("bin") {
                continue;
            }
            let payload = tokio::fs::read(&path).await?;
            match decode_snapshot_file(&payload) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(error) => warn!(path = %path.display(), %error, "skipping unreadable snapshot"),
            }
        }
        sort_snapshots(&mut snapshots);
        Ok(snapshots)
    }
}

#[derive(Clone, Debug)]
pub struct S3StoreConfig {
    pub bucket: String,
    pub prefix: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3StoreConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: None,
            region: None,
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Object key layout: `<prefix>/<id>.bin`, or `<id>.bin` without a prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKeys {
    prefix: String,
}

impl ObjectKeys {
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix.unwrap_or_default().trim_matches('/').to_string(),
        }
    }

    pub fn object_key(&self, id: &str) -> String {
        if self.prefix.is_empty() {
            format!("{id}.bin")
        } else {
            format!("{}/{id}.bin", self.prefix)
        }
    }

    pub fn list_prefix(&self) -> Option<String> {
        (!self.prefix.is_empty()).then(|| format!("{}/", self.prefix))
    }

    /// The snapshot id stored under `key`, if the key belongs to this layout.
    pub fn snapshot_id<'a>(&self, key: &'a str) -> Option<&'a str> {
        let name = match self.list_prefix() {
            Some(prefix) => key.strip_prefix(prefix.as_str())?,
            None => key,
        };
        let id = name.strip_suffix(".bin")?;
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }
}

pub struct S3Store {
    bucket: String,
    keys: ObjectKeys,
    client: Client,
}

impl S3Store {
    pub async fn new(config: S3StoreConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let (Some(access_key_id), Some(secret_access_key)) =
            (config.access_key_id, config.secret_access_key)
        {
            let creds = Credentials::new(access_key_id, secret_access_key, None, None, "sketchroom");
            loader = loader.credentials_provider(creds);
        }
        if let Some(region) = config.region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let mut builder = aws_sdk_s3::config::Builder::from(&loader.load().await)
            .force_path_style(config.force_path_style);
        if let Some(endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        Self {
            bucket: config.bucket,
            keys: ObjectKeys::new(config.prefix.as_deref()),
            client: Client::from_conf(builder.build()),
        }
    }

    async fn put(
        &self,
        id: &str,
        snapshot: &Snapshot,
        if_match: Option<String>,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.keys.object_key(id))
            .set_if_match(if_match)
            .body(ByteStream::from(encode_snapshot_file(snapshot)))
            .send()
            .await
            .map_err(|error| {
                // A conditional put against a deleted object fails with 404 or 412.
                match error.raw_response().map(|response| response.status().as_u16()) {
                    Some(404 | 412) => StoreError::NotFound(id.to_string()),
                    _ => StoreError::Backend(format!("failed to save snapshot {id} to s3: {error:?}")),
                }
            })?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for S3Store {
    async fn load(&self, id: &str) -> Result<Snapshot, StoreError> {
        let id = checked_id(id)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.keys.object_key(&id))
            .send()
            .await
            .map_err(|error| match error.as_service_error() {
                Some(service_error) if service_error.is_no_such_key() => {
                    StoreError::NotFound(id.clone())
                }
                _ => StoreError::Backend(format!("failed to load snapshot {id} from s3: {error:?}")),
            })?;
        let bytes = output.body.collect().await.map_err(|error| {
            StoreError::Backend(format!("failed to read snapshot {id} body: {error:?}"))
        })?;
        decode(&id, &bytes.into_bytes())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let id = checked_id(&snapshot.id)?;
        self.put(&id, snapshot, None).await
    }

    /// Conditional on the object's current ETag, so a delete in between wins.
    async fn update(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let id = checked_id(&snapshot.id)?;
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.keys.object_key(&id))
            .send()
            .await
            .map_err(|error| match error.as_service_error() {
                Some(service_error) if service_error.is_not_found() => {
                    StoreError::NotFound(id.clone())
                }
                _ => StoreError::Backend(format!("failed to stat snapshot {id} in s3: {error:?}")),
            })?;
        self.put(&id, snapshot, head.e_tag().map(str::to_string)).await
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        // Deletes of missing keys succeed, so probe first to report NotFound.
        let snapshot = self.load(id).await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.keys.object_key(&snapshot.id))
            .send()
            .await
            .map_err(|error| {
                StoreError::Backend(format!("failed to delete snapshot {id} from s3: {error:?}"))
            })?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Snapshot>, StoreError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(self.keys.list_prefix())
            .into_paginator()
            .send();
        let mut snapshots = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|error| {
                StoreError::Backend(format!("failed to list snapshots: {error:?}"))
            })?;
            let ids = page
                .contents()
                .iter()
                .filter_map(|object| object.key())
                .filter_map(|key| self.keys.snapshot_id(key));
            for id in ids {
                match self.load(id).await {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(StoreError::NotFound(_)) => {}
                    Err(error) => warn!(id, %error, "skipping unreadable snapshot"),
                }
            }
        }
        sort_snapshots(&mut snapshots);
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(name: &str) -> Snapshot {
        let now = Utc::now();
        Snapshot {
            id: new_snapshot_id(),
            name: name.into(),
            image: vec![1, 2, 3],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn file_store_crud() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("snapshots")).await.unwrap();

        let first = snapshot("first");
        store.save(&first).await.unwrap();
        let loaded = store.load(&first.id).await.unwrap();
        assert_eq!(loaded.name, "first");
        assert_eq!(loaded.image, vec![1, 2, 3]);

        let mut second = snapshot("second");
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        store.save(&second).await.unwrap();
        let names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["first", "second"]);

        store.remove(&first.id).await.unwrap();
        assert!(matches!(
            store.load(&first.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.remove(&first.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(matches!(
            store.load("../secret").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_store_skips_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).await.unwrap();
        tokio::fs::write(dir.path().join("junk.bin"), b"nope")
            .await
            .unwrap();
        store.save(&snapshot("ok")).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "ok");
    }

    #[tokio::test]
    async fn update_does_not_resurrect_a_removed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).await.unwrap();
        let original = snapshot("kept");
        store.save(&original).await.unwrap();

        let mut edited = store.load(&original.id).await.unwrap();
        edited.name = "edited".into();
        store.update(&edited).await.unwrap();
        assert_eq!(store.load(&original.id).await.unwrap().name, "edited");

        // A delete lands between the load and the write.
        let stale = store.load(&original.id).await.unwrap();
        store.remove(&original.id).await.unwrap();
        assert!(matches!(
            store.update(&stale).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.load(&original.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn object_keys_with_and_without_prefix() {
        let bare = ObjectKeys::new(None);
        assert_eq!(bare.object_key("abc"), "abc.bin");
        assert_eq!(bare.list_prefix(), None);
        assert_eq!(bare.snapshot_id("abc.bin"), Some("abc"));
        assert_eq!(bare.snapshot_id("nested/abc.bin"), None);
        assert_eq!(bare.snapshot_id("abc.txt"), None);

        let prefixed = ObjectKeys::new(Some("/boards/snapshots/"));
        assert_eq!(prefixed.object_key("abc"), "boards/snapshots/abc.bin");
        assert_eq!(prefixed.list_prefix().as_deref(), Some("boards/snapshots/"));
        assert_eq!(prefixed.snapshot_id("boards/snapshots/abc.bin"), Some("abc"));
        assert_eq!(prefixed.snapshot_id("other/abc.bin"), None);
        assert_eq!(prefixed.snapshot_id("boards/snapshots/.bin"), None);

        assert_eq!(ObjectKeys::new(Some("")), bare);
    }

    #[test]
    fn snapshot_ids_are_uuids() {
        let id = new_snapshot_id();
        assert_eq!(normalize_snapshot_id(&id), Some(id.clone()));
        assert_eq!(normalize_snapshot_id("sketch1"), None);
    }
}
