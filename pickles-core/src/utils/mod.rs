pub mod deferred;
pub mod errors;
pub mod math;
pub mod transcript;
