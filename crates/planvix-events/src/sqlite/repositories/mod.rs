//! Stateless SQL repositories.

pub mod activity;

pub use activity::ActivityRepo;
