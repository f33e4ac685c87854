//! Intelligence provider adapters.

pub mod anthropic;
pub mod mock;

pub use anthropic::{AnthropicProvider, Pricing};
pub use mock::{MockIntelligenceProvider, MockResponse};
