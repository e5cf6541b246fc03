pub mod health;

pub use health::{HealthStats, health_score};
