pub mod config;
pub mod error;
pub mod events;
pub mod types;
pub mod url_topic;

pub use config::{Config, MatchWeights, Thresholds};
pub use error::SentryError;
pub use events::{ActionProposal, DecisionTrigger, MatchComputed, Queue};
pub use types::*;
pub use url_topic::{build_topic_key, canonicalize_url_for_topic, url_hash};
