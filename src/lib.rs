//! ALB Ingress Controller Library
//!
//! Core functionality for the ALB ingress controller: the in-memory
//! resource model and its layered reconcilers, AWS adapters, ingress
//! translation, and the control loop. Tests live alongside the module
//! files.

pub mod alb;
pub mod annotations;
pub mod aws;
pub mod config;
pub mod constants;
pub mod controller;
pub mod ingress;
pub mod k8s;
pub mod observability;
pub mod server;
