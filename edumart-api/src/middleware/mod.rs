pub mod auth;

pub use auth::{admin_auth_middleware, instructor_auth_middleware, issue_token, user_auth_middleware, Claims, Role};
