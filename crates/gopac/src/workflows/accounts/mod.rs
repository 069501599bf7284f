//! Portal accounts: sign-up with role and department rules, sign-in and
//! profile lookup. Both write to the shared audit trail.

pub mod router;
pub mod service;


pub use router::account_router;
pub use service::{AccountError, AccountService, Registration, SignIn, MIN_PASSWORD_CHARS};
