pub mod auth;
pub mod push;
pub mod queue;
pub mod redirect;
