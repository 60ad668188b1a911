/// User records and usage accounting
///
/// - `types`: the `t_user` record and its structured sub-records
/// - `codec`: text encoding of the structured columns
/// - `accounting`: used-space transition rules
/// - `store`: the SQLite-backed store and its accounting guard

pub mod accounting;
pub mod codec;
pub mod store;
pub mod types;

pub use accounting::{next_used_space, UsageDirection};
pub use store::UserStore;
pub use types::{
    BgConfig, Preferences, Quota, User, ADMIN_ROLE, KNOWN_ROLES, USER_ROLE, VISITOR_ROLE,
};
