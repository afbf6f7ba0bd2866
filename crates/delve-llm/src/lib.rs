pub mod anthropic;
pub mod batch;
pub mod converter;
pub mod models;
pub mod reliable;

pub mod mock;

pub use anthropic::AnthropicProvider;
pub use batch::AnthropicBatchProvider;
pub use mock::{MockBatchProvider, MockItem, MockProvider, MockResponse};
pub use reliable::{ReliableConfig, ReliableProvider};
