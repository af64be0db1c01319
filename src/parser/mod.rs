pub mod artifact;
pub mod filename;
pub mod listing;
pub mod locator;
