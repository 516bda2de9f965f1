mod actor;
mod ops;
mod scheduler;

pub use actor::CodexActorHandle;
pub(in crate::providers) use actor::spawn;
pub use scheduler::CredentialId;
