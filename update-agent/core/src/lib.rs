#![forbid(unsafe_code)]
#![warn(unreachable_pub)]

pub mod compare;
pub mod descriptor;
pub mod github;
pub mod rollback;

pub use compare::VersionCheck;
pub use descriptor::VersionDescriptor;
pub use rollback::{RollbackReason, RollbackRecord};
