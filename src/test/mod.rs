mod bank;
mod content;
pub mod utils;
mod visits;
