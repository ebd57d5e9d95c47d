//! Auth-domain identifiers, user identities, and token secrets.

pub mod id;
pub mod id_token;
pub mod secret;
pub mod user;

pub use id::*;
pub use id_token::*;
pub use secret::*;
pub use user::*;
