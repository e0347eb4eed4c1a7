pub mod purge;
pub mod reconciler;
pub mod role_assigner;

pub use purge::{PurgeCoordinator, PurgeRegistry, CONFIRM_EMOJI};
pub use reconciler::{ReactionEvent, Reconciler, SyncOutcome};
