pub mod cli;
pub mod config;
pub mod counter;
pub mod engine;
pub mod gateway;
pub mod governance;
pub mod live;
pub mod logging;
pub mod policy;
pub mod request;
