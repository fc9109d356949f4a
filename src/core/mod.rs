pub mod network;
pub mod paths;
