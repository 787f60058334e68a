//! Duckcast - automated posting with shared, rate-limited credentials
//!
//! This library rotates text-generation credentials under usage caps and
//! health tracking, rotates posting identities, and fans engagement out
//! across every identity concurrently.

pub mod broadcast;
pub mod config;
pub mod content;
pub mod credentials;
pub mod error;
pub mod generation;
pub mod headlines;
pub mod identities;
pub mod invoker;
pub mod logging;
pub mod orchestrator;
pub mod platforms;
pub mod runtime;
pub mod scheduling;
pub mod types;

// Re-export commonly used types
pub use broadcast::ActionBroadcaster;
pub use config::Config;
pub use credentials::{Credential, CredentialPool};
pub use error::{DuckcastError, Result};
pub use headlines::{FileHeadlineSource, HeadlineSource};
pub use identities::{Identity, IdentityPool};
pub use invoker::ResilientInvoker;
pub use orchestrator::{CycleFailure, CycleState, PostingOrchestrator};
pub use runtime::{Runtime, RuntimeStats};
pub use types::{BroadcastResult, EngagementAction, Profile, PublishedPost};
