mod identifier;
mod session;

pub use identifier::{is_email, Resolver, ResolveError};
pub use session::{SessionManager, SessionState, SignInError, SignUpError};
