pub mod agent;

pub use agent::AgentRemote;
