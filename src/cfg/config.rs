// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::transport::MAX_TRANSPORT_IOV;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Session-layer sizing and limits.
    pub session: SessionConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Tunables of one session layer instance. Everything lives in memory;
/// the layer keeps no on-disk state of its own.
pub struct SessionConfig {
    #[serde(rename = "MaxSessions")]
    /// Number of slots in the session table. Session numbers are 16 bit
    /// on the wire and 0xFFFF is reserved for "no session", so the table
    /// tops out at 65 535 entries.
    pub max_sessions: u16,

    #[serde(rename = "MaxSendIov", default = "default_max_send_iov")]
    /// Ceiling on caller-supplied chunks per `send_datav`. The data SPDU
    /// header occupies one more transport entry, so this must stay below
    /// the transport's own vector limit.
    pub max_send_iov: usize,
}

fn default_max_send_iov() -> usize {
    MAX_TRANSPORT_IOV - 1
}

impl Default for Config {
    fn default() -> Self {
        Self::new(16)
    }
}

impl Config {
    pub fn new(max_sessions: u16) -> Self {
        Self {
            session: SessionConfig {
                max_sessions,
                max_send_iov: default_max_send_iov(),
            },
        }
    }

    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.session.max_sessions >= 1, "MaxSessions must be >= 1");
        ensure!(self.session.max_send_iov >= 1, "MaxSendIov must be >= 1");
        ensure!(
            self.session.max_send_iov < MAX_TRANSPORT_IOV,
            "MaxSendIov must leave room for the SPDU header (< {MAX_TRANSPORT_IOV})"
        );
        Ok(())
    }
}
