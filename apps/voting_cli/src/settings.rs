use std::{collections::HashMap, fs};

#[derive(Debug)]
pub struct Settings {
    pub rpc_url: String,
    pub contract_address: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".into(),
            // First contract deployed on a fresh local Hardhat node.
            contract_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("voting.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("rpc_url") {
                settings.rpc_url = v.clone();
            }
            if let Some(v) = file_cfg.get("contract_address") {
                settings.contract_address = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("VOTING_RPC_URL") {
        settings.rpc_url = v;
    }
    if let Ok(v) = std::env::var("VOTING_CONTRACT_ADDRESS") {
        settings.contract_address = v;
    }

    settings
}
