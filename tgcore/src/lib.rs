pub mod api;
pub mod auth;
pub mod content;
pub mod correlator;
pub mod reading;
pub mod records;
