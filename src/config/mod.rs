// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for colloquy.
//!
//! Two layers:
//! - Application config: `colloquy.yaml`/`colloquy.yml`/`colloquy.json` in the
//!   working directory, or `~/.colloquy/config.yaml`
//! - Session config: stored per session and edited parameter by parameter,
//!   seeded from the application's `session_defaults`

mod loader;
mod types;

pub use loader::{
    find_config_file, get_global_config_dir, get_global_config_path, load_app_config,
    load_config_file, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use types::{
    AppConfig, PrefillMode, SessionConfig, VendorKind, MANDATORY_PARAMS, PARAM_NAMES,
    PRIVATE_PARAMS,
};
