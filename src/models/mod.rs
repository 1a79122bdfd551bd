pub mod finding;
pub mod image;
pub mod job;
pub mod message;
pub mod report;

pub use finding::*;
pub use image::*;
pub use job::*;
pub use message::*;
pub use report::*;
