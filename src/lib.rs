#![allow(clippy::too_many_arguments)]

#[macro_use]
extern crate log as log_crate;

pub mod alloc;
pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod overlap;
pub mod residency;
pub mod sampler;
mod sync;
pub mod task;
pub mod tokenizer;

/// Things used in almost every application built on this crate.
pub mod prelude {
    pub use {
        super::{
            config::{CoreConfig, CoreConfigBuilder, SamplerConfig, SamplerConfigBuilder},
            context::InferenceContext,
            error::CoreError,
            model::Model,
            sampler::Sampler,
            tokenizer::Tokenizer,
        },
        log_crate::{debug, error, info, trace, warn},
    };
}

pub use self::{
    config::{CoreConfig, CoreConfigBuilder},
    error::CoreError,
    model::Model,
};

/// Only required when embedding this crate without any other logging setup.
pub fn init_debug() {
    let _ = pretty_env_logger::try_init();

    info!("t5-overlap-core v{}", env!("CARGO_PKG_VERSION"));
}
