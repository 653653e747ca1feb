pub mod health;
pub mod jobs;
pub mod predictions;
pub mod uploads;
