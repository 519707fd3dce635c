// Library surface so pipeline stages are testable outside the binary

pub mod migration;
