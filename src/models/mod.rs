//! Data layer for the outbound action core.
//!
//! One module per entity. Row structs map 1:1 onto the migration schema via
//! `FromRow`; status columns are closed enums so every transition site is
//! forced through an exhaustive match.

pub mod agent_account;
pub mod attribution;
pub mod job;
pub mod scheduled_post;
pub mod system_alert;

pub use agent_account::AgentAccount;
pub use attribution::{
    AttributionReview, ModelWeights, ReviewStatus, SalesAttribution, Touchpoint,
};
pub use job::{ActionType, Job, JobPayload, JobPriority, JobStatus, NewJob};
pub use scheduled_post::{
    AgentModification, NewScheduledPost, PostStatus, ScheduledPost, SelectionFactors,
};
pub use system_alert::{AlertType, SystemAlert};
