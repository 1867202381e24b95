pub mod configuration;
pub mod router;
pub mod scheduler;
pub mod solver;
