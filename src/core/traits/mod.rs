pub mod language;
pub mod processor;
pub mod sandbox;
