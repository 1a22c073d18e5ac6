pub mod changebus;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod filter;
pub mod gateway;
pub mod logging;
pub mod mirror;
pub mod ratelimiter;
pub mod realtime;
pub mod settings;
pub mod storage;
pub mod supervisor;
pub mod tasks;

pub use config::ProcessConfig;
pub use errors::MirrorError;
pub use filter::FilterEngine;
pub use gateway::{GrammersGateway, TelegramGateway};
pub use mirror::{MessageMirror, MirrorOutcome};
pub use ratelimiter::RateLimiter;
pub use realtime::RealtimeManager;
pub use settings::Settings;
pub use tasks::TaskRunner;
