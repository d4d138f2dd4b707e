//! Plan records and their on-disk store.
//!
//! Layout under the state directory:
//!
//! ```text
//! <state_dir>/
//!   .gitignore          "*", keeps state out of the working tree status
//!   plans/<plan_id>.json
//! ```

mod record;
mod store;

pub use record::{
    CommitRecord, CommitScope, ImplementationAttempt, ImplementationState, PlanRecord,
    PlanSummary, Rejection, VerificationAttempt, VerificationState,
};
pub use store::PlanStore;
