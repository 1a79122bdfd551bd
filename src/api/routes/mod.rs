pub mod dead_letters;
pub mod events;
pub mod findings;
pub mod health;
pub mod images;
pub mod jobs;
pub mod queues;
pub mod reports;
pub mod vulns;
