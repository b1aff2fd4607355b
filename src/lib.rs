// Library exports for the Vigil worker supervisor

pub mod config;
pub mod error;
pub mod exit;
pub mod status;
pub mod supervisor;
pub mod watchdog;
