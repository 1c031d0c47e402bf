//! Site handlers and the selector that picks one for a URL
//!
//! ## Key Components
//!
//! - [`SiteHandler`] - Contract every site handler implements
//! - [`HandlerCore`] - Shared state: folder, options, callbacks, counters, cancel flag
//! - [`HandlerRegistry`] - Ordered handler list with universal and generic fallbacks
//! - [`DirectHandler`] - Generic fallback treating the URL as a file link
//! - [`EngineHandler`] - Universal fallback driving an external engine binary
//!
//! ## Example
//!
//! ```rust,ignore
//! use mediafetch::handlers::{HandlerContext, HandlerRegistry, SelectOptions};
//!
//! let registry = HandlerRegistry::from_config(&config.engine);
//! let ctx = HandlerContext::new("downloads", options);
//! if let Some(handler) = registry.select(url, ctx, &SelectOptions::default()) {
//!     let result = handler.download(url).await;
//! }
//! ```

mod cancel;
mod direct;
mod engine;
mod filter;
mod http;
mod registry;
mod traits;
mod types;

pub use cancel::CancelToken;
pub use direct::{DirectHandler, filename_from_url};
pub use engine::{EngineHandler, EngineLine, engine_available, engine_args, parse_engine_line};
pub use filter::{classify_filename, sanitize_filename, should_download};
pub use http::{FetchOutcome, HttpClient};
pub use registry::{HandlerFactory, HandlerRegistry, SelectOptions};
pub use traits::{HandlerCore, HandlerError, NativeHandler, SiteHandler};
pub use types::{
    Callbacks, DownloadOptions, DownloadResult, FileProgressFn, FileType, HandlerContext,
    LogFn, MAX_RETRY_INTERVAL_SECS, MediaItem, OptionsError, OverallProgressFn, WidgetsFn,
};
