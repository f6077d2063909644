pub mod admin;
pub mod factory;
pub mod http;
pub mod remote;
pub mod services;
pub mod store;
pub mod strategies;
pub mod tasks;
