//! Format-based decoder selection.

use remotecodec_core::{FormatDescriptor, LoopbackConfig};
use tracing::{debug, warn};

use super::{CapabilityError, DecodingCapability, LoopbackCapability};

/// Builds a decoder instance for a format.
pub type CapabilityFactory = Box<
    dyn Fn(&FormatDescriptor) -> Result<Box<dyn DecodingCapability>, CapabilityError>
        + Send
        + Sync,
>;

type FormatPredicate = Box<dyn Fn(&FormatDescriptor) -> bool + Send + Sync>;

/// Registry lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("No decoder for {mime}")]
    NoDecoder { mime: String },
}

struct Entry {
    name: String,
    accepts: FormatPredicate,
    factory: CapabilityFactory,
}

/// Ordered list of available decoders. The first entry that accepts a
/// format and builds successfully wins.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: Vec<Entry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the loopback decoder, accepting any well-formed format.
    pub fn with_loopback(config: &LoopbackConfig) -> Self {
        let mut registry = Self::new();
        let config = config.clone();
        registry.register(
            "loopback",
            |format| format.validate().is_ok(),
            move |_| {
                Ok(Box::new(LoopbackCapability::new(
                    config.slot_count,
                    config.slot_capacity,
                )))
            },
        );
        registry
    }

    pub fn register<P, F>(&mut self, name: impl Into<String>, accepts: P, factory: F)
    where
        P: Fn(&FormatDescriptor) -> bool + Send + Sync + 'static,
        F: Fn(&FormatDescriptor) -> Result<Box<dyn DecodingCapability>, CapabilityError>
            + Send
            + Sync
            + 'static,
    {
        self.entries.push(Entry {
            name: name.into(),
            accepts: Box::new(accepts),
            factory: Box::new(factory),
        });
    }

    /// Register a decoder for one exact MIME type.
    pub fn register_mime<F>(&mut self, name: impl Into<String>, mime: impl Into<String>, factory: F)
    where
        F: Fn(&FormatDescriptor) -> Result<Box<dyn DecodingCapability>, CapabilityError>
            + Send
            + Sync
            + 'static,
    {
        let mime = mime.into();
        self.register(name, move |format| format.mime == mime, factory);
    }

    /// Build a decoder for `format`.
    pub fn select(
        &self,
        format: &FormatDescriptor,
    ) -> Result<Box<dyn DecodingCapability>, RegistryError> {
        for entry in self.entries.iter().filter(|e| (e.accepts)(format)) {
            match (entry.factory)(format) {
                Ok(capability) => {
                    debug!(decoder = %entry.name, %format, "Selected decoder");
                    return Ok(capability);
                }
                Err(e) => {
                    warn!(decoder = %entry.name, %format, error = %e, "Decoder creation failed");
                }
            }
        }
        Err(RegistryError::NoDecoder {
            mime: format.mime.clone(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("entries", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
