//! In-memory collaborators and fixtures for pipeline tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use image::{ImageFormat, Rgba, RgbaImage};
use uuid::Uuid;

use slicer_core::models::{Extension, Image, Slice, SliceStatus};
use slicer_core::{AppError, Config, StorageBackend};
use slicer_proxy::state::AppState;
use slicer_registry::Registry;
use slicer_storage::keys::object_key;
use slicer_storage::{ByteStream, Storage, StorageError, StorageItem, StorageResult};

pub struct InMemoryRegistry {
    images: Mutex<HashMap<Uuid, Image>>,
    slices: Mutex<HashMap<(Uuid, String), Slice>>,
    pub fail_slice_lookups: AtomicBool,
    pub create_slice_calls: AtomicUsize,
    pub create_slice_conflicts: AtomicUsize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        InMemoryRegistry {
            images: Mutex::new(HashMap::new()),
            slices: Mutex::new(HashMap::new()),
            fail_slice_lookups: AtomicBool::new(false),
            create_slice_calls: AtomicUsize::new(0),
            create_slice_conflicts: AtomicUsize::new(0),
        }
    }

    pub fn slice(&self, image_id: Uuid, filename: &str) -> Option<Slice> {
        self.slices
            .lock()
            .unwrap()
            .get(&(image_id, filename.to_string()))
            .cloned()
    }

    pub fn slice_count(&self, image_id: Uuid) -> usize {
        self.slices
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| *id == image_id)
            .count()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    fn generate_id(&self) -> Uuid {
        Uuid::new_v4()
    }

    async fn get_image_by_id(&self, id: Uuid, only_published: bool) -> Result<Image, AppError> {
        let image = self
            .images
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("image {} not found", id)))?;

        if only_published && !image.is_published() {
            return Err(AppError::NotFound(format!("image {} not found", id)));
        }

        Ok(image)
    }

    async fn get_image_with_slices_by_id(
        &self,
        id: Uuid,
        only_published: bool,
    ) -> Result<Image, AppError> {
        let mut image = self.get_image_by_id(id, only_published).await?;
        image.slices = self
            .slices
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.image_id == id && s.status == SliceStatus::Active)
            .cloned()
            .collect();
        Ok(image)
    }

    async fn get_slice_by_image_id_and_filename(
        &self,
        image_id: Uuid,
        filename: &str,
    ) -> Result<Slice, AppError> {
        if self.fail_slice_lookups.load(Ordering::SeqCst) {
            return Err(AppError::RegistryFailed("simulated outage".to_string()));
        }

        self.slices
            .lock()
            .unwrap()
            .get(&(image_id, filename.to_string()))
            .filter(|s| s.status == SliceStatus::Active)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("slice {} of image {} not found", filename, image_id))
            })
    }

    async fn create_image_with_original_slice(
        &self,
        image: &Image,
        slice: &Slice,
    ) -> Result<(), AppError> {
        let mut stored = image.clone();
        stored.original_slice = Some(slice.clone());

        self.images.lock().unwrap().insert(image.id, stored);
        self.slices
            .lock()
            .unwrap()
            .insert((slice.image_id, slice.filename.clone()), slice.clone());

        Ok(())
    }

    async fn create_slice(&self, slice: &Slice) -> Result<Uuid, AppError> {
        self.create_slice_calls.fetch_add(1, Ordering::SeqCst);

        let mut slices = self.slices.lock().unwrap();
        let key = (slice.image_id, slice.filename.clone());

        if slices.contains_key(&key) {
            self.create_slice_conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(AppError::RegistryFailed(format!(
                "slice already exists for image {} filename {}",
                slice.image_id, slice.filename
            )));
        }

        slices.insert(key, slice.clone());
        Ok(slice.id)
    }

    async fn depublish_image(&self, id: Uuid) -> Result<(), AppError> {
        let mut images = self.images.lock().unwrap();
        let image = images
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("image {} not found", id)))?;
        image.publish_at = None;
        Ok(())
    }

    async fn remove_image_with_all_slices(&self, id: Uuid) -> Result<(), AppError> {
        self.images.lock().unwrap().remove(&id);
        self.slices.lock().unwrap().retain(|(i, _), _| *i != id);
        Ok(())
    }

    async fn migrate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct InMemoryStorage {
    objects: Mutex<HashMap<String, Bytes>>,
    download_barrier: Mutex<Option<Arc<tokio::sync::Barrier>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        InMemoryStorage {
            objects: Mutex::new(HashMap::new()),
            download_barrier: Mutex::new(None),
        }
    }

    /// Make `download` rendezvous at a barrier, so tests can force multiple
    /// requests to race on the same cache miss.
    pub fn set_download_barrier(&self, barrier: Arc<tokio::sync::Barrier>) {
        *self.download_barrier.lock().unwrap() = Some(barrier);
    }

    pub fn object(&self, namespace: &str, filename: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&object_key(namespace, filename))
            .cloned()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put(
        &self,
        namespace: &str,
        filename: &str,
        data: Bytes,
    ) -> StorageResult<StorageItem> {
        let key = object_key(namespace, filename);
        self.objects.lock().unwrap().insert(key.clone(), data);

        Ok(StorageItem {
            url: format!("http://storage.test/{}", key),
            path: key,
        })
    }

    async fn download(&self, namespace: &str, filename: &str) -> StorageResult<Vec<u8>> {
        let barrier = self.download_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        let key = object_key(namespace, filename);
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .map(|b| b.to_vec())
            .ok_or(StorageError::NotFound(key))
    }

    async fn download_stream(&self, namespace: &str, filename: &str) -> StorageResult<ByteStream> {
        let key = object_key(namespace, filename);
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(StorageError::NotFound(key))?;

        // chunked to exercise the streaming path
        let chunks: Vec<StorageResult<Bytes>> = data
            .chunks(8 * 1024)
            .map(|c| Ok(data.slice_ref(c)))
            .collect();

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn remove(&self, namespace: &str, filename: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&object_key(namespace, filename));
        Ok(())
    }
}

pub fn test_config(allow_upscale: bool) -> Config {
    Config {
        server_port: 0,
        environment: "test".into(),
        database_url: "postgresql://localhost/slicer_test".into(),
        db_max_connections: 1,
        db_timeout_seconds: 1,
        storage_backend: Some(StorageBackend::Local),
        s3_bucket: None,
        s3_region: None,
        s3_endpoint: None,
        local_storage_path: Some("/tmp/slicer-test".into()),
        local_storage_base_url: Some("http://localhost/media".into()),
        allow_upscale,
        size_discrete_step: 0,
        quality_discrete_step: 0,
        scale_discrete_step: 0,
        proxy_request_timeout_secs: 5,
        persist_timeout_secs: 5,
        registry_tx_commit_secs: 2,
    }
}

pub struct Fixture {
    pub registry: Arc<InMemoryRegistry>,
    pub storage: Arc<InMemoryStorage>,
    pub state: Arc<AppState>,
}

impl Fixture {
    pub fn new(allow_upscale: bool) -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let storage = Arc::new(InMemoryStorage::new());
        let state = Arc::new(AppState::new(
            test_config(allow_upscale),
            Arc::clone(&registry) as Arc<dyn Registry>,
            Arc::clone(&storage) as Arc<dyn Storage>,
        ));

        Fixture {
            registry,
            storage,
            state,
        }
    }
}

/// PNG with a red left half and a blue right half, so crops and flips move
/// recognizable pixels.
pub fn split_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 255, 255])
        }
    });
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Register a published image with its original slice and store the original
/// object. Returns the image as the registry would serve it.
pub async fn ingest_png(fixture: &Fixture, width: u32, height: u32) -> Image {
    let data = Bytes::from(split_png(width, height));
    let image_id = Uuid::new_v4();
    let namespace = "gallery".to_string();
    let filename = format!("{}/h{}_w{}.png", image_id, height, width);

    let item = fixture
        .storage
        .put(&namespace, &filename, data.clone())
        .await
        .unwrap();

    let slice = Slice {
        id: Uuid::new_v4(),
        image_id,
        width: width as i32,
        height: height as i32,
        size: data.len() as i64,
        quality: 0,
        filename: filename.clone(),
        namespace: namespace.clone(),
        path: item.path,
        cropped: false,
        extension: Extension::Png,
        mime: "image/png".into(),
        created_at: Utc::now(),
        is_valid: true,
        status: SliceStatus::Active,
        is_original: true,
    };

    let image = Image {
        id: image_id,
        name: "fixture".into(),
        original_name: "fixture.png".into(),
        original_ext: Extension::Png,
        original_size: data.len() as i64,
        namespace,
        publish_at: Some(Utc::now() - ChronoDuration::hours(1)),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        original_slice: None,
        slices: Vec::new(),
    };

    fixture
        .registry
        .create_image_with_original_slice(&image, &slice)
        .await
        .unwrap();

    fixture
        .registry
        .get_image_by_id(image_id, true)
        .await
        .unwrap()
}

/// Run the pipeline into an in-memory buffer, reading concurrently the way a
/// real client would.
pub async fn serve_to_vec(
    state: &Arc<AppState>,
    transformation: &slicer_processing::Transformation,
    image: &Image,
) -> Result<(slicer_proxy::ServedSlice, Vec<u8>), AppError> {
    let (mut writer, mut reader) = tokio::io::duplex(64 * 1024);

    let read_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
            .await
            .map(|_| buf)
    });

    let served = state.proxy.serve(&mut writer, transformation, image).await;
    drop(writer);

    let body = read_task.await.unwrap().unwrap();
    served.map(|s| (s, body))
}

/// Poll until `cond` holds or a short deadline passes.
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
