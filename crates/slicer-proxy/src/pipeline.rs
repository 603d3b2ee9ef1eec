//! The streaming pipeline at the heart of the proxy.
//!
//! A request fans out into up to four cooperating tasks: the storage
//! download, the raster transform (on a blocking worker), the client writer
//! and the detached persister. They are connected by bounded channels, and
//! the request multiplexes over three completion sources: an error channel,
//! a done channel carrying the served descriptor, and the request deadline.
//! The first error wins; a deadline maps to `Cancelled` and skips
//! persistence entirely.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use slicer_core::models::{
    compute_slice_filename, compute_slice_path, Extension, Image, Slice, SliceStatus,
};
use slicer_core::AppError;
use slicer_processing::{
    Normalizer, RasterTransformer, SliceDescriptor, SpecConverter, Transformation,
};
use slicer_registry::Registry;
use slicer_storage::{ByteStream, Storage, StorageError};

use crate::persister::Persister;
use crate::resolver::CacheResolver;

/// Chunk size for tee-streaming a transformed body to the client.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;
/// Bounded depth of the transformer-to-client channel. The producer blocks
/// when the client is slow, bounding memory to one image's worth.
const CHUNK_CHANNEL_CAPACITY: usize = 4;

/// What the pipeline actually sent to the client.
#[derive(Debug, Clone)]
pub struct ServedSlice {
    pub filename: String,
    pub mime: String,
    pub width: i32,
    pub height: i32,
    pub namespace: String,
    pub extension: Extension,
    pub size: i64,
    pub image_id: Uuid,
}

/// On-the-fly persisting image proxy.
pub struct ImageProxy {
    registry: Arc<dyn Registry>,
    storage: Arc<dyn Storage>,
    converter: SpecConverter,
    normalizer: Normalizer,
    transformer: Arc<RasterTransformer>,
    resolver: CacheResolver,
    persister: Persister,
    request_timeout: Duration,
}

impl ImageProxy {
    pub fn new(
        registry: Arc<dyn Registry>,
        storage: Arc<dyn Storage>,
        converter: SpecConverter,
        normalizer: Normalizer,
        transformer: Arc<RasterTransformer>,
        persister: Persister,
        request_timeout: Duration,
    ) -> Self {
        let resolver = CacheResolver::new(Arc::clone(&registry));

        ImageProxy {
            registry,
            storage,
            converter,
            normalizer,
            transformer,
            resolver,
            persister,
            request_timeout,
        }
    }

    /// Parse the spec, load the image and normalize the transformation
    /// against it. Everything that can reject a request before any bytes
    /// flow happens here.
    pub async fn prepare(
        &self,
        id: &str,
        requested_transformations: &str,
        requested_extension: &str,
    ) -> Result<(Transformation, Image), AppError> {
        let mut transformation = self
            .converter
            .convert(requested_transformations, requested_extension)?;

        let image_id = Uuid::parse_str(id)
            .map_err(|e| AppError::BadInput(format!("invalid image id {}: {}", id, e)))?;

        let image = self.registry.get_image_by_id(image_id, true).await?;

        self.normalizer.normalize(&mut transformation, &image)?;

        // refuse an upscale before any response bytes are committed
        if let Some(original) = image.original_slice() {
            self.transformer.refuse_out_of_bounds(
                &transformation,
                original.width.max(0) as u32,
                original.height.max(0) as u32,
            )?;
        }

        Ok((transformation, image))
    }

    /// Stream the requested derivative to `dst`.
    ///
    /// On an exact cache hit the stored object is passed through untouched.
    /// Otherwise the original is transformed on the fly; the client and the
    /// background persister observe the exact same bytes.
    pub async fn serve<W>(
        &self,
        dst: &mut W,
        transformation: &Transformation,
        image: &Image,
    ) -> Result<ServedSlice, AppError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let requested_filename = compute_slice_filename(image.id, &transformation.filename());
        let (slice, exact_match) = self.resolver.resolve(image, &requested_filename).await?;

        let deadline = tokio::time::Instant::now() + self.request_timeout;

        if exact_match {
            tracing::debug!(
                image_id = %image.id,
                filename = %slice.filename,
                "serving cached slice"
            );
            self.stream_without_transformation(dst, &slice, image, deadline)
                .await
        } else {
            tracing::debug!(
                image_id = %image.id,
                filename = %requested_filename,
                "transforming original slice"
            );
            self.stream_with_transformation(dst, &slice, image, transformation, deadline)
                .await
        }
    }

    /// Pass-through path: copy the stored object to the client unchanged.
    async fn stream_without_transformation<W>(
        &self,
        dst: &mut W,
        slice: &Slice,
        image: &Image,
        deadline: tokio::time::Instant,
    ) -> Result<ServedSlice, AppError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut stream = self
            .open_download_stream(&slice.namespace, &slice.filename)
            .await?;

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        dst.write_all(&bytes).await.map_err(|e| {
                            AppError::Cancelled(format!("client went away: {}", e))
                        })?;
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                },
                _ = &mut sleep => {
                    return Err(AppError::Cancelled("request deadline exceeded".to_string()))
                }
            }
        }

        Ok(ServedSlice {
            filename: slice.filename.clone(),
            mime: slice.mime.clone(),
            width: slice.width,
            height: slice.height,
            namespace: image.namespace.clone(),
            extension: slice.extension,
            size: slice.size,
            image_id: slice.image_id,
        })
    }

    /// Transform-and-persist path: download the original, transform it on a
    /// blocking worker, tee the result to the client and the persister.
    async fn stream_with_transformation<W>(
        &self,
        dst: &mut W,
        original: &Slice,
        image: &Image,
        transformation: &Transformation,
        deadline: tokio::time::Instant,
    ) -> Result<ServedSlice, AppError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (err_tx, mut err_rx) = mpsc::channel::<AppError>(2);
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Bytes>(CHUNK_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel::<(SliceDescriptor, Bytes)>();

        let storage = Arc::clone(&self.storage);
        let transformer = Arc::clone(&self.transformer);
        let namespace = original.namespace.clone();
        let filename = original.filename.clone();
        let image_for_task = image.clone();
        let task_transformation = transformation.clone();

        tokio::spawn(async move {
            let source = match download_with_retry(storage.as_ref(), &namespace, &filename).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    let _ = err_tx.send(err).await;
                    return;
                }
            };

            let transform_result = tokio::task::spawn_blocking(move || {
                let mut encoded = Vec::new();
                let descriptor = transformer.create_slice(
                    &source,
                    &mut encoded,
                    &image_for_task,
                    &task_transformation,
                )?;
                Ok::<_, AppError>((descriptor, encoded))
            })
            .await;

            let (descriptor, encoded) = match transform_result {
                Ok(Ok(pair)) => pair,
                Ok(Err(err)) => {
                    let _ = err_tx.send(err).await;
                    return;
                }
                Err(join_err) => {
                    let _ = err_tx
                        .send(AppError::RasterFailed(format!(
                            "transform task aborted: {}",
                            join_err
                        )))
                        .await;
                    return;
                }
            };

            let body = Bytes::from(encoded);

            // tee: the client receives the same buffer the persister will
            // write, chunk by chunk
            for chunk in body.chunks(STREAM_CHUNK_SIZE) {
                if chunk_tx.send(body.slice_ref(chunk)).await.is_err() {
                    // client side is gone, nothing to persist
                    return;
                }
            }
            drop(chunk_tx);

            let _ = done_tx.send((descriptor, body));
        });

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                chunk = chunk_rx.recv() => match chunk {
                    Some(bytes) => {
                        dst.write_all(&bytes).await.map_err(|e| {
                            AppError::Cancelled(format!("client went away: {}", e))
                        })?;
                    }
                    None => break,
                },
                Some(err) = err_rx.recv() => return Err(err),
                _ = &mut sleep => {
                    return Err(AppError::Cancelled("request deadline exceeded".to_string()))
                }
            }
        }

        let (descriptor, body) = match done_rx.await {
            Ok(pair) => pair,
            Err(_) => {
                // the producer died after closing the chunk channel; its
                // error, if any, is parked in the error channel
                return Err(err_rx.recv().await.unwrap_or_else(|| {
                    AppError::RasterFailed("transformation ended unexpectedly".to_string())
                }));
            }
        };

        self.persister
            .spawn(slice_from_descriptor(image, &descriptor), body);

        Ok(ServedSlice {
            filename: compute_slice_filename(image.id, &descriptor.filename),
            mime: descriptor.mime.clone(),
            width: descriptor.width,
            height: descriptor.height,
            namespace: image.namespace.clone(),
            extension: descriptor.extension,
            size: descriptor.size,
            image_id: image.id,
        })
    }

    /// Open a storage read stream, retrying once on transient failure.
    async fn open_download_stream(
        &self,
        namespace: &str,
        filename: &str,
    ) -> Result<ByteStream, AppError> {
        match self.storage.download_stream(namespace, filename).await {
            Ok(stream) => Ok(stream),
            Err(err @ StorageError::NotFound(_)) => Err(err.into()),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    namespace = %namespace,
                    filename = %filename,
                    "storage read failed, retrying once"
                );
                self.storage
                    .download_stream(namespace, filename)
                    .await
                    .map_err(AppError::from)
            }
        }
    }
}

/// Download a whole object, retrying once on transient failure.
async fn download_with_retry(
    storage: &dyn Storage,
    namespace: &str,
    filename: &str,
) -> Result<Vec<u8>, AppError> {
    match storage.download(namespace, filename).await {
        Ok(bytes) => Ok(bytes),
        Err(err @ StorageError::NotFound(_)) => Err(err.into()),
        Err(err) => {
            tracing::warn!(
                error = %err,
                namespace = %namespace,
                filename = %filename,
                "storage read failed, retrying once"
            );
            storage
                .download(namespace, filename)
                .await
                .map_err(AppError::from)
        }
    }
}

/// Build the unsaved slice record the persister will activate.
fn slice_from_descriptor(image: &Image, descriptor: &SliceDescriptor) -> Slice {
    let filename = compute_slice_filename(image.id, &descriptor.filename);

    Slice {
        // assigned by the persister
        id: Uuid::nil(),
        image_id: image.id,
        width: descriptor.width,
        height: descriptor.height,
        size: descriptor.size,
        quality: descriptor.quality,
        path: compute_slice_path(&image.namespace, &filename),
        filename,
        namespace: image.namespace.clone(),
        cropped: descriptor.cropped,
        extension: descriptor.extension,
        mime: descriptor.mime.clone(),
        created_at: Utc::now(),
        is_valid: false,
        status: SliceStatus::Unsaved,
        is_original: false,
    }
}
