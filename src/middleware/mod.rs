pub mod rate_limit;
pub mod webhook_auth;
