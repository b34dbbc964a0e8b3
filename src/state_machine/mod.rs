//! # Human-Oversight State Machines
//!
//! The two review surfaces built on top of the queue: content approval
//! (drafts gated before publishing) and attribution review (inferred
//! revenue credits gated before they feed model learning). Both persist
//! every transition with an audit entry in the same transaction, and both
//! reject illegal transitions synchronously; an illegal request is a
//! caller bug, never queued work.

pub mod approval;
pub mod attribution_review;

pub use approval::ContentApproval;
pub use attribution_review::{AttributionReviewQueue, ReviewDecision, ReviewFeedback};
