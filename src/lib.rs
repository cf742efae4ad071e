pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod fleet;
pub mod orchestrator;
pub mod printer;
pub mod queue;
pub mod registry;
pub mod rpc;
pub mod state_machine;
pub mod store;
pub mod ui;

#[cfg(test)]
pub(crate) mod test_support;
