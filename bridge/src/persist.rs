// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{BridgeError, BridgeResult};
use crate::types::ConsensusChangeId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tfchain_bridge_config::{load_json, save_json, Metadata};

pub const SETTINGS_FILE: &str = "bridge.json";

const SETTINGS_METADATA: Metadata = Metadata {
    header: "Bridge Settings",
    version: "0.0.1",
};

/// Checkpoint of the last home-chain block drained from the reorg buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgePersistence {
    #[serde(rename = "recentchange")]
    pub recent_change: ConsensusChangeId,
    pub height: u64,
}

/// The settings file inside the bridge data directory.
#[derive(Clone, Debug)]
pub struct PersistenceStore {
    path: PathBuf,
}

impl PersistenceStore {
    pub fn new(persist_dir: &Path) -> Self {
        Self {
            path: persist_dir.join(SETTINGS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the checkpoint, creating the directory and a zeroed file on
    /// first run.
    pub fn init(&self) -> BridgeResult<BridgePersistence> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        if !self.path.exists() {
            let persistence = BridgePersistence::default();
            self.save(&persistence)?;
            tracing::info!(
                "[Bridge] Created bridge settings at {}",
                self.path.display()
            );
            return Ok(persistence);
        }
        self.load()
    }

    pub fn load(&self) -> BridgeResult<BridgePersistence> {
        load_json(SETTINGS_METADATA, &self.path)
            .map_err(|e| BridgeError::StorageError(format!("{:#}", e)))
    }

    pub fn save(&self, persistence: &BridgePersistence) -> BridgeResult<()> {
        save_json(SETTINGS_METADATA, persistence, &self.path)
            .map_err(|e| BridgeError::StorageError(format!("{:#}", e)))
    }
}
