pub mod access;
pub mod children;
pub mod conditions;
pub mod config;
pub mod controller;
pub mod crd;
pub mod metrics;
pub mod reporter;
pub mod runtime;
pub mod store;
pub mod templates;
pub mod web;
