/// Native module contains implementations of core traits
/// that run jobs directly on the host, with plain processes
/// and a scratch directory per job instead of containers.
pub mod sandbox;
pub mod workspace;
