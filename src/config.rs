//! Engine configuration
//!
//! This module handles configuration loading, validation and the derivation
//! of the negotiation policy the receive path works with.

use crate::frame::MacAddr;
use crate::peers::AID_MAX;
use crate::rates::{McsSet, RateSet, HT_MCS_COUNT, RATE_BASIC, RATE_MAXSIZE, RATE_VAL};
use crate::scan::NWID_LEN;
use crate::security::{Cipher, CipherSet, KeyMgmt, KeyMgmtSet, SecurityPolicy};
use crate::state::{OpMode, PhyMode};
use crate::{Dot11Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interface settings
    pub general: GeneralConfig,
    /// BSS identity
    pub bss: BssConfig,
    /// Legacy rates
    pub rates: RatesConfig,
    /// High throughput
    pub ht: HtConfig,
    /// Authentication and privacy
    pub security: SecurityConfig,
    /// Peer table and power save
    pub peers: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Our hardware address
    pub address: MacAddr,
    /// Operating role
    pub mode: OpMode,
    pub phy: PhyMode,
    /// Current channel
    pub channel: u8,
    /// Accept Atheros fast-frame tunnels
    pub fast_frames: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BssConfig {
    pub ssid: String,
    /// BSSID of our own BSS; defaults to our address
    pub bssid: Option<MacAddr>,
    /// Refuse wildcard probe requests
    pub hide_ssid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    /// Supported rates in 500 kb/s units
    pub supported: Vec<u8>,
    /// Basic rates, a subset of `supported`
    pub basic: Vec<u8>,
    /// Rate every peer must support
    pub fixed_rate: Option<u8>,
    /// Refuse stations without OFDM rates
    pub pure_g: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HtConfig {
    pub enabled: bool,
    /// Supported MCS indices
    pub mcs: Vec<u8>,
    /// MCS indices every HT peer must support
    pub basic_mcs: Vec<u8>,
    /// Accept pre-standard vendor HT elements
    pub compat: bool,
    /// Accept A-MSDU aggregation
    pub amsdu: bool,
    /// Refuse stations without HT
    pub pure_n: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Open,
    Shared,
    /// Open or shared
    Auto,
    /// 802.1X controls the port
    Dot1x,
    /// WPA key management controls the port
    Wpa,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub auth_mode: AuthMode,
    /// Privacy (WEP or better) enabled
    pub privacy: bool,
    /// Only EAPOL may pass unencrypted
    pub drop_unencrypted: bool,
    pub wpa: WpaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WpaConfig {
    /// Accept the WPA vendor element
    pub wpa1: bool,
    /// Accept the RSN element
    pub rsn: bool,
    pub mcast_cipher: Cipher,
    pub ucast_ciphers: Vec<Cipher>,
    pub key_mgmt: Vec<KeyMgmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Maximum number of peers
    pub max_peers: usize,
    /// Frames buffered per dozing peer
    pub ps_queue_len: usize,
    /// Enable peer filtering
    pub enable_filtering: bool,
    /// Allowed peer addresses
    pub allowed_peers: Vec<MacAddr>,
    /// Blocked peer addresses
    pub blocked_peers: Vec<MacAddr>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            address: MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            mode: OpMode::Station,
            phy: PhyMode::Dot11g,
            channel: 6,
            fast_frames: false,
        }
    }
}

impl Default for BssConfig {
    fn default() -> Self {
        Self {
            ssid: "dot11".to_string(),
            bssid: None,
            hide_ssid: false,
        }
    }
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            supported: vec![2, 4, 11, 22, 12, 18, 24, 36, 48, 72, 96, 108],
            basic: vec![2, 4, 11, 22],
            fixed_rate: None,
            pure_g: false,
        }
    }
}

impl Default for HtConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mcs: (0..8).collect(),
            basic_mcs: Vec::new(),
            compat: true,
            amsdu: true,
            pure_n: false,
        }
    }
}

impl Default for WpaConfig {
    fn default() -> Self {
        Self {
            wpa1: false,
            rsn: false,
            mcast_cipher: Cipher::Tkip,
            ucast_ciphers: vec![Cipher::Tkip, Cipher::AesCcm],
            key_mgmt: vec![KeyMgmt::Ieee8021x, KeyMgmt::Psk],
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            max_peers: 128,
            ps_queue_len: 50,
            enable_filtering: false,
            allowed_peers: Vec::new(),
            blocked_peers: Vec::new(),
        }
    }
}

/// Negotiation policy derived from an [`EngineConfig`]
#[derive(Debug, Clone)]
pub struct LocalPolicy {
    pub rates: RateSet,
    pub fixed_rate: Option<u8>,
    pub mcs: McsSet,
    pub basic_mcs: McsSet,
    pub security: Option<SecurityPolicy>,
}

impl EngineConfig {
    /// Supported rates with the basic flag applied
    pub fn local_rates(&self) -> RateSet {
        let rates: Vec<u8> = self
            .rates
            .supported
            .iter()
            .map(|r| {
                let value = r & RATE_VAL;
                if self.rates.basic.iter().any(|b| b & RATE_VAL == value) {
                    value | RATE_BASIC
                } else {
                    value
                }
            })
            .collect();
        RateSet::new(&rates)
    }

    pub fn security_policy(&self) -> Option<SecurityPolicy> {
        let wpa = &self.security.wpa;
        if !wpa.wpa1 && !wpa.rsn {
            return None;
        }
        Some(SecurityPolicy {
            wpa: wpa.wpa1,
            rsn: wpa.rsn,
            mcast_cipher: wpa.mcast_cipher,
            ucast_ciphers: wpa.ucast_ciphers.iter().copied().collect::<CipherSet>(),
            key_mgmt: wpa.key_mgmt.iter().copied().collect::<KeyMgmtSet>(),
        })
    }

    pub fn policy(&self) -> LocalPolicy {
        LocalPolicy {
            rates: self.local_rates(),
            fixed_rate: self.rates.fixed_rate,
            mcs: McsSet::from_indices(&self.ht.mcs),
            basic_mcs: McsSet::from_indices(&self.ht.basic_mcs),
            security: self.security_policy(),
        }
    }

    /// BSSID of the BSS we operate
    pub fn own_bssid(&self) -> MacAddr {
        self.bss.bssid.unwrap_or(self.general.address)
    }

    /// Whether the access control list admits `addr`
    pub fn acl_allows(&self, addr: &MacAddr) -> bool {
        let peers = &self.peers;
        if !peers.enable_filtering {
            return true;
        }
        if peers.blocked_peers.contains(addr) {
            return false;
        }
        peers.allowed_peers.is_empty() || peers.allowed_peers.contains(addr)
    }
}

/// Configuration validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether configuration is valid
    pub valid: bool,
    /// Validation errors
    pub errors: Vec<String>,
    /// Validation warnings
    pub warnings: Vec<String>,
}

/// Configuration manager
#[derive(Debug, Default)]
pub struct ConfigManager {
    /// Current configuration
    config: EngineConfig,
    /// Path to configuration file
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration manager with config
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            config_path: None,
        }
    }

    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Dot11Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: EngineConfig = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| Dot11Error::Config(format!("Failed to parse JSON config: {}", e)))?,
            Some("toml") => toml::from_str(&content)
                .map_err(|e| Dot11Error::Config(format!("Failed to parse TOML config: {}", e)))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| Dot11Error::Config(format!("Failed to parse YAML config: {}", e)))?,
            _ => return Err(Dot11Error::Config("Unsupported config file format".to_string())),
        };

        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => self.to_json()?,
            Some("toml") => self.to_toml()?,
            Some("yaml") | Some("yml") => self.to_yaml()?,
            _ => return Err(Dot11Error::Config("Unsupported config file format".to_string())),
        };

        fs::write(path, content)
            .map_err(|e| Dot11Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get current configuration
    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the configuration after validating it
    pub fn update_config(&mut self, new_config: EngineConfig) -> Result<()> {
        let validation = Self::validate_config(&new_config)?;
        if !validation.valid {
            return Err(Dot11Error::Config(format!(
                "Configuration validation failed: {}",
                validation.errors.join(", ")
            )));
        }
        for warning in &validation.warnings {
            log::warn!("Configuration: {}", warning);
        }

        self.config = new_config;
        Ok(())
    }

    /// Reload configuration from file
    pub fn reload(&mut self) -> Result<()> {
        let path = self
            .config_path
            .clone()
            .ok_or_else(|| Dot11Error::Config("No config file path set".to_string()))?;
        let new_manager = Self::load_from_file(path)?;
        self.update_config(new_manager.config)
    }

    /// Validate configuration
    pub fn validate_config(config: &EngineConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        let general = &config.general;
        if general.address.is_group() || general.address.is_zero() {
            result.errors.push(format!("Invalid interface address {}", general.address));
        }
        if general.channel == 0 && general.mode != OpMode::Monitor {
            result.errors.push("Channel cannot be 0".to_string());
        }

        if config.bss.ssid.len() > NWID_LEN {
            result.errors.push(format!("SSID longer than {} bytes", NWID_LEN));
        }
        if config.bss.ssid.is_empty() && matches!(general.mode, OpMode::HostAp | OpMode::AdHoc) {
            result.errors.push("SSID required to operate a BSS".to_string());
        }

        let rates = &config.rates;
        if rates.supported.is_empty() {
            result.errors.push("At least one rate must be supported".to_string());
        }
        if rates.supported.len() > RATE_MAXSIZE {
            result.errors.push(format!("At most {} rates may be supported", RATE_MAXSIZE));
        }
        if rates.supported.iter().any(|r| *r == 0 || *r & RATE_BASIC != 0) {
            result.errors.push("Rates must be in 1..=127 (500 kb/s units)".to_string());
        }
        if let Some(rate) = rates.basic.iter().find(|b| !rates.supported.contains(*b)) {
            result.errors.push(format!("Basic rate {} is not supported", rate));
        }
        if let Some(fixed) = rates.fixed_rate {
            if !rates.supported.contains(&fixed) {
                result.errors.push(format!("Fixed rate {} is not supported", fixed));
            }
        }
        if rates.pure_g && general.phy != PhyMode::Dot11g {
            result.warnings.push("pure_g has no effect outside 11g".to_string());
        }

        let ht = &config.ht;
        if ht.mcs.iter().any(|m| *m as usize >= HT_MCS_COUNT) {
            result.errors.push(format!("MCS indices must be below {}", HT_MCS_COUNT));
        }
        if let Some(mcs) = ht.basic_mcs.iter().find(|m| !ht.mcs.contains(*m)) {
            result.errors.push(format!("Basic MCS {} is not supported", mcs));
        }
        if ht.pure_n && !ht.enabled {
            result.errors.push("pure_n requires HT".to_string());
        }

        let security = &config.security;
        if matches!(security.auth_mode, AuthMode::Shared | AuthMode::Auto) && !security.privacy {
            result.warnings.push("Shared key authentication needs privacy enabled".to_string());
        }
        let wpa = &security.wpa;
        if wpa.wpa1 || wpa.rsn {
            if wpa.ucast_ciphers.is_empty() {
                result.errors.push("WPA enabled without unicast ciphers".to_string());
            }
            if wpa.key_mgmt.is_empty() {
                result.errors.push("WPA enabled without key management suites".to_string());
            }
            if !security.privacy {
                result.warnings.push("WPA enabled with privacy off".to_string());
            }
        }

        let peers = &config.peers;
        if peers.max_peers == 0 {
            result.errors.push("Max peers cannot be 0".to_string());
        }
        if peers.max_peers > AID_MAX as usize {
            result.warnings.push(format!("Association ids stop at {}", AID_MAX));
        }
        if peers.ps_queue_len == 0 {
            result.warnings.push("Power-save queue length is 0, frames for dozing peers are dropped".to_string());
        }
        if peers.allowed_peers.iter().any(|a| peers.blocked_peers.contains(a)) {
            result.warnings.push("Address both allowed and blocked".to_string());
        }

        // Check if any errors occurred
        result.valid = result.errors.is_empty();

        Ok(result)
    }

    /// Get configuration as JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.config)
            .map_err(|e| Dot11Error::Config(format!("Failed to serialize config to JSON: {}", e)))
    }

    /// Get configuration as TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.config)
            .map_err(|e| Dot11Error::Config(format!("Failed to serialize config to TOML: {}", e)))
    }

    /// Get configuration as YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.config)
            .map_err(|e| Dot11Error::Config(format!("Failed to serialize config to YAML: {}", e)))
    }
}
