pub mod artifact;
pub mod batch;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod retry;
pub mod security;
pub mod session;
