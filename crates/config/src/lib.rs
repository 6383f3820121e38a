//! Configuration for mucnotify: server registry, delivery policy and
//! `${VAR}` substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    env_subst::{substitute_env, substitute_vars},
    loader::{
        clear_config_dir, config_dir, discover_and_load, find_config_file, load_config,
        set_config_dir, write_default_config,
    },
    schema::{DeliveryConfig, MucNotifyConfig, ServerEntry},
};
