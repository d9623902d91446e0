pub mod backend;
pub mod clock;
pub mod config;
pub mod run;
pub mod session;
pub mod sync;
pub mod telemetry;
pub mod transcript;
