use std::sync::Arc;

use slicer_core::Config;
use slicer_processing::{
    Normalizer, NormalizerConfig, RasterTransformer, SpecConverter, TransformerConfig,
};
use slicer_registry::Registry;
use slicer_storage::Storage;

use crate::persister::Persister;
use crate::pipeline::ImageProxy;

/// Shared application state for the HTTP layer.
pub struct AppState {
    pub proxy: Arc<ImageProxy>,
    pub config: Config,
}

impl AppState {
    /// Wire up the proxy pipeline from its collaborators and configuration.
    pub fn new(config: Config, registry: Arc<dyn Registry>, storage: Arc<dyn Storage>) -> Self {
        let normalizer = Normalizer::new(NormalizerConfig {
            allow_upscale: config.allow_upscale,
            size_discrete_step: config.size_discrete_step,
            quality_discrete_step: config.quality_discrete_step,
            scale_discrete_step: config.scale_discrete_step,
        });

        let transformer = Arc::new(RasterTransformer::new(TransformerConfig {
            allow_upscale: config.allow_upscale,
        }));

        let persister = Persister::new(
            Arc::clone(&registry),
            Arc::clone(&storage),
            config.persist_timeout(),
        );

        let proxy = Arc::new(ImageProxy::new(
            registry,
            storage,
            SpecConverter::new(),
            normalizer,
            transformer,
            persister,
            config.proxy_request_timeout(),
        ));

        AppState { proxy, config }
    }
}
