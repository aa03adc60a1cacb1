pub mod aggregate;
pub mod config;
pub mod derived;
pub mod player_features;
pub mod reactivation;
pub mod rfm;
