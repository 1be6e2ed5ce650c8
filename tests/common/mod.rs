pub mod actions;
pub mod harness;
pub mod mock_oauth;

pub use harness::Harness;
