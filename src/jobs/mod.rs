pub mod sweeper;
pub mod verification;
