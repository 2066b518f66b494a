//! http handlers for the tailgrant api.

mod error;
mod grants;
mod health;
mod identity;
mod meta;

pub use error::ApiError;
pub use grants::{
    approve_grant, create_grant, deny_grant, extend_grant, get_grant, list_grants, revoke_grant,
};
pub use health::health;
pub use identity::{Caller, DEVICE_HEADER, LOGIN_HEADER};
pub use meta::{list_devices, list_grant_types, list_users, whoami};
