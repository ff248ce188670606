pub mod cli;
pub mod commands;
pub mod presenter;
pub mod utils;
