mod admin_user;
mod claim;
mod claim_history;
mod session;
mod stats;
mod user;

pub use admin_user::*;
pub use claim::*;
pub use claim_history::*;
pub use session::*;
pub use stats::*;
pub use user::*;
