mod configs;
mod ledger;
mod listeners;
mod store;

pub use configs::{
    OveruseConfigState, PendingClaim, SyncedConfigs, validate_configurations,
    validate_resource_flags,
};
pub use ledger::{
    LoadedUsage, NoRecurrence, PackageResourceUsage, RecurrencePolicy, UsageLedger, UsageSnapshot,
};
pub use listeners::{ListenerRegistry, ListenerScope, OveruseListener};
pub use store::OveruseStore;
