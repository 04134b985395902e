pub mod builder;
pub mod constraint_system;
pub mod ops;
pub mod sponge;
