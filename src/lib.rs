pub mod analyzer;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod player;
pub mod resolver;
pub mod sandbox;
pub mod server;
pub mod stream_url;
pub mod types;

pub use analyzer::{PlayerScriptAnalyzer, TransformAnalyzer};
pub use cache::PlayerCache;
pub use config::Config;
pub use error::ResolveError;
pub use fetcher::{HttpPlayerFetcher, PlayerFetcher};
pub use player::{AnalysisResult, PlayerIdentity};
pub use resolver::Resolver;
pub use sandbox::{Sandbox, Transforms};
pub use server::build_app;
