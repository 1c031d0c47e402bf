use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::direct::DirectHandler;
use super::engine::{EngineHandler, engine_available};
use super::traits::{NativeHandler, SiteHandler};
use super::types::HandlerContext;
use crate::config::{EngineConfig, SelectorConfig};

/// Builds a fresh handler bound to one invocation's context
pub type HandlerFactory = Arc<dyn Fn(HandlerContext) -> Box<dyn SiteHandler> + Send + Sync>;

/// Per-call switches for the two fallback tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOptions {
    pub use_universal_fallback: bool,
    pub use_generic_fallback: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            use_universal_fallback: true,
            use_generic_fallback: true,
        }
    }
}

impl From<&SelectorConfig> for SelectOptions {
    fn from(config: &SelectorConfig) -> Self {
        Self {
            use_universal_fallback: config.use_universal_fallback,
            use_generic_fallback: config.use_generic_fallback,
        }
    }
}

/// Ordered set of site handlers plus the two fallback tiers.
///
/// Native handlers are tried in registration order; the universal fallback
/// only when it accepts the URL; the generic fallback unconditionally.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    native: Vec<(TypeId, HandlerFactory)>,
    universal: Option<HandlerFactory>,
    generic: Option<HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in fallbacks installed.
    ///
    /// The universal fallback is only installed when its engine binary can
    /// be found.
    pub fn from_config(engine: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.set_generic_fallback(|ctx| Box::new(DirectHandler::new(ctx)));

        if engine_available(&engine.binary) {
            info!(binary = %engine.binary, "Universal fallback enabled");
            let engine = engine.clone();
            registry.set_universal_fallback(move |ctx| Box::new(EngineHandler::new(ctx, &engine)));
        } else {
            info!(binary = %engine.binary, "Engine binary not found, universal fallback disabled");
        }

        registry
    }

    /// Append a native handler. Returns false when `H` is already registered.
    pub fn register<H: NativeHandler>(&mut self) -> bool {
        let id = TypeId::of::<H>();
        if self.native.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let factory: HandlerFactory =
            Arc::new(|ctx: HandlerContext| -> Box<dyn SiteHandler> { Box::new(H::build(ctx)) });
        self.native.push((id, factory));
        true
    }

    pub fn set_universal_fallback(
        &mut self,
        factory: impl Fn(HandlerContext) -> Box<dyn SiteHandler> + Send + Sync + 'static,
    ) {
        self.universal = Some(Arc::new(factory));
    }

    pub fn set_generic_fallback(
        &mut self,
        factory: impl Fn(HandlerContext) -> Box<dyn SiteHandler> + Send + Sync + 'static,
    ) {
        self.generic = Some(Arc::new(factory));
    }

    pub fn has_universal_fallback(&self) -> bool {
        self.universal.is_some()
    }

    /// Pick the handler for `url`, or `None` when every tier declines
    pub fn select(
        &self,
        url: &str,
        ctx: HandlerContext,
        options: &SelectOptions,
    ) -> Option<Box<dyn SiteHandler>> {
        for (_, factory) in &self.native {
            let handler = factory(ctx.clone());
            if handler.supports_url(url) {
                debug!(url, site = handler.site_name(), "Selected native handler");
                return Some(handler);
            }
        }

        if options.use_universal_fallback {
            if let Some(factory) = &self.universal {
                let handler = factory(ctx.clone());
                if handler.supports_url(url) {
                    debug!(url, site = handler.site_name(), "Selected universal fallback");
                    return Some(handler);
                }
            }
        }

        if options.use_generic_fallback {
            if let Some(factory) = &self.generic {
                let handler = factory(ctx);
                debug!(url, site = handler.site_name(), "Selected generic fallback");
                return Some(handler);
            }
        }

        debug!(url, "No handler available");
        None
    }

    /// Names of the native handlers in order, then the universal fallback
    pub fn supported_sites(&self) -> Vec<String> {
        self.native
            .iter()
            .map(|(_, factory)| factory)
            .chain(self.universal.as_ref())
            .map(|factory| factory(HandlerContext::default()).site_name().to_string())
            .collect()
    }

    /// Number of native handlers
    pub fn len(&self) -> usize {
        self.native.len()
    }

    pub fn is_empty(&self) -> bool {
        self.native.is_empty()
    }

    /// Drop every native handler, keeping the fallbacks
    pub fn clear(&mut self) {
        self.native.clear();
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("native", &self.native.len())
            .field("universal", &self.universal.is_some())
            .field("generic", &self.generic.is_some())
            .finish()
    }
}
