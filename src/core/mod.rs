pub mod config;
pub mod error;
pub mod io;
pub mod models;
pub mod normalize;
pub mod transport;
