pub mod admission;
pub mod domain;
pub mod language;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod traits;
