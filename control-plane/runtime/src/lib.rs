#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use consul_k8s_acl as acl;
pub use consul_k8s_api as k8s;
pub use consul_k8s_connect_inject as connect_inject;

mod admission;
mod args;
mod cluster;
mod controller;
mod inject;
mod metrics;
mod validation;

pub use self::args::Args;
