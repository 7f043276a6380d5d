pub mod catalog;
pub mod cli;
pub mod css;
pub mod error;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod render;
pub mod rewrite;
pub mod static_page;
pub mod url_utils;

// Re-export main types for convenience
pub use catalog::{AssetCatalog, AssetRecord, CapturedPage};
pub use cli::CloneCommand;
pub use error::{CloneError, FetchError};
pub use events::{CloneEvent, EventSink, StepKind};
pub use fetch::AssetFetcher;
pub use pipeline::{CloneOptions, CloneOutcome, PageCloner};
pub use render::RenderOptions;
pub use url_utils::AssetBucket;
