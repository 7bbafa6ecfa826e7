//! # sh-auth
//!
//! Authentication for the "me" API scope.
//!
//! Requests carry `Authorization: Bearer <jwt>`; the token subject is the
//! user id. Issuing tokens belongs to the account system, `create_token`
//! exists for tooling and tests.

pub mod current_user;
pub mod jwt;
pub mod middleware;

pub use current_user::CurrentUser;
pub use jwt::{extract_bearer_token, Claims, JwtError, JwtService};
pub use middleware::{AuthError, Authenticator};
