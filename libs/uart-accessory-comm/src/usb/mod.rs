pub mod aoa;
pub mod discovery;
pub mod error;
pub mod link;
