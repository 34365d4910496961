//! Startup plumbing for `server_fetch`: command-line/env overrides and
//! the config document they are merged over.

pub mod config;
