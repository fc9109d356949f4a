//! Path and name constants shared across subsystems
//!
//! Centralized registry for well-known file names, ports, environment
//! variables and node error codes.

/// Files exchanged with the signing device through the working directory
pub mod device {
    /// Summary file exported by the device (Advanced > MicroSD > Dump Summary)
    pub const EXPORT_FILE: &str = "public.txt";
    pub const UNSIGNED_PREFIX: &str = "unsigned-";
    pub const PSBT_EXT: &str = ".psbt";
    pub const SIGNED_SUFFIX: &str = "-signed.psbt";
    /// Prefix of the node-side wallet name and config identifier
    pub const WALLET_ID_PREFIX: &str = "coldcard-";
}

/// Node configuration discovery
pub mod node {
    pub const CONF_FILE: &str = "bitcoin.conf";
    pub const COOKIE_FILE: &str = ".cookie";
    pub const DEFAULT_HOST: &str = "localhost";

    pub const PORT_MAINNET: u16 = 8332;
    pub const PORT_TESTNET: u16 = 18332;
    pub const PORT_SIGNET: u16 = 38332;
    pub const PORT_REGTEST: u16 = 18443;

    pub const USER_AGENT: &str = "coldpair/0.1";
}

/// Local state files
pub mod local {
    pub const CONFIG_DIR: &str = "coldpair";
    pub const CONFIG_FILE: &str = "config.json";
    pub const CHECKPOINT_FILE: &str = ".coldpair-onboarding.json";
}

/// Environment variables read by the binary
pub mod env {
    pub const CONFIG: &str = "COLDPAIR_CONFIG";
    pub const RPC: &str = "COLDPAIR_RPC";
    pub const LOG_JSON: &str = "COLDPAIR_LOG_JSON";
}

/// Bitcoin Core JSON-RPC error codes the workflow interprets
pub mod rpc_codes {
    /// RPC_WALLET_ERROR: also used for "wallet already exists / already loaded"
    pub const WALLET_ERROR: i64 = -4;
    /// RPC_INVALID_ADDRESS_OR_KEY
    pub const INVALID_ADDRESS_OR_KEY: i64 = -5;
    /// RPC_DESERIALIZATION_ERROR, e.g. "TX decode failed"
    pub const DESERIALIZATION_ERROR: i64 = -22;
    /// RPC_WALLET_ALREADY_LOADED (Core 22+)
    pub const WALLET_ALREADY_LOADED: i64 = -35;
    /// RPC_MISC_ERROR, used when the node reports a non-object error
    pub const MISC_ERROR: i64 = -1;
}
