pub mod cli;
pub mod config;
pub mod interpretation;
pub mod logging;
pub mod runner;
pub mod stream;
