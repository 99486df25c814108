pub mod envelope;
pub mod jwt;
pub mod problem;
pub mod util;
