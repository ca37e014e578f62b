pub mod accumulator;
pub mod cli;
pub mod config;
pub mod constants;
pub mod harvest;
pub mod logging;
pub mod pipeline;
pub mod remote;
pub mod retention;
pub mod store;
pub mod upload;
pub mod window;
pub mod workers;
