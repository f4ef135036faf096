pub mod history;
pub mod network;
pub mod node;
pub mod snapshot;
