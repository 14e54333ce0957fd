pub mod compiler;
pub mod dsl;
