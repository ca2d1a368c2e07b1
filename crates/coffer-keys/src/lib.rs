pub mod env;
pub mod local;
pub mod provider;

pub mod factory;
