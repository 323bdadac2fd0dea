// Modules
pub mod config;
pub mod console;
pub mod consts;
pub mod evolution;
pub mod persistence;
pub mod process;
pub mod simulation;
pub mod strategy;
