//! Proxy pattern detection.
//!
//! Recognizes the common upgradeability layouts by reading their well-known
//! storage slots. Auto-detectors run in a fixed priority order and the first
//! one that yields an implementation wins; a contract matching none of them
//! is immutable. A `proxyType` override pins a single detector.

use ethers_core::types::{Address, Bytes, H256, U256};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use scout_common::{ContractValue, DiscoveryProvider, RpcResult};
use scout_config::ManualProxyType;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// `keccak256("eip1967.proxy.implementation") - 1`
static EIP1967_IMPLEMENTATION_SLOT: Lazy<H256> = Lazy::new(|| {
    "0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc"
        .parse()
        .expect("valid slot constant")
});

/// `keccak256("eip1967.proxy.admin") - 1`
static EIP1967_ADMIN_SLOT: Lazy<H256> = Lazy::new(|| {
    "0xb53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103"
        .parse()
        .expect("valid slot constant")
});

/// `keccak256("eip1967.proxy.beacon") - 1`
static EIP1967_BEACON_SLOT: Lazy<H256> = Lazy::new(|| {
    "0xa3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50"
        .parse()
        .expect("valid slot constant")
});

/// `keccak256("PROXIABLE")`, the EIP-1822 logic slot
static EIP1822_LOGIC_SLOT: Lazy<H256> = Lazy::new(|| {
    "0xc5f16f0fcc639fa48a6947836d9850f504798523bf8c9a3a87d5876cf622bcf7"
        .parse()
        .expect("valid slot constant")
});

/// `implementation()`
const IMPLEMENTATION_SELECTOR: [u8; 4] = [0x5c, 0x60, 0xda, 0x1b];
/// `masterCopy()`
const MASTER_COPY_SELECTOR: [u8; 4] = [0xa6, 0x19, 0x48, 0x6e];

/// What the detector learned about one address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProxyDetection {
    /// `None` means immutable (not a proxy).
    pub proxy_type: Option<ManualProxyType>,
    pub implementations: Vec<Address>,
    /// Addresses surfaced by the proxy layout itself (admin, beacon, ...).
    pub relatives: Vec<Address>,
    /// `$`-prefixed values merged into the contract's value map.
    pub values: BTreeMap<String, ContractValue>,
}

impl ProxyDetection {
    fn immutable() -> Self {
        Self::default()
    }
}

/// Detects proxy layouts, caching one detection per address for the run.
#[derive(Debug, Default)]
pub struct ProxyDetector {
    cache: Mutex<HashMap<Address, ProxyDetection>>,
}

impl ProxyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn detect(
        &self,
        provider: &dyn DiscoveryProvider,
        address: Address,
        manual: Option<ManualProxyType>,
    ) -> RpcResult<ProxyDetection> {
        if let Some(detection) = self.cache.lock().get(&address).cloned() {
            return Ok(detection)
        }

        let detection = match manual {
            Some(ManualProxyType::Immutable) => Some(ProxyDetection::immutable()),
            Some(ManualProxyType::Eip1967) => eip1967(provider, address).await?,
            Some(ManualProxyType::Beacon) => beacon(provider, address).await?,
            Some(ManualProxyType::Uups) => uups(provider, address).await?,
            Some(ManualProxyType::GnosisSafe) => gnosis_safe(provider, address).await?,
            None => auto_detect(provider, address).await?,
        };
        let detection = detection.unwrap_or_else(ProxyDetection::immutable);

        trace!(target: "scout::proxy", ?address, proxy_type = ?detection.proxy_type, "detected");
        self.cache.lock().insert(address, detection.clone());
        Ok(detection)
    }
}

async fn auto_detect(
    provider: &dyn DiscoveryProvider,
    address: Address,
) -> RpcResult<Option<ProxyDetection>> {
    if let detection @ Some(_) = eip1967(provider, address).await? {
        return Ok(detection)
    }
    if let detection @ Some(_) = beacon(provider, address).await? {
        return Ok(detection)
    }
    if let detection @ Some(_) = uups(provider, address).await? {
        return Ok(detection)
    }
    gnosis_safe(provider, address).await
}

async fn eip1967(
    provider: &dyn DiscoveryProvider,
    address: Address,
) -> RpcResult<Option<ProxyDetection>> {
    let implementation =
        address_from_word(provider.get_storage(address, *EIP1967_IMPLEMENTATION_SLOT).await?);
    let Some(implementation) = implementation else { return Ok(None) };

    let admin = address_from_word(provider.get_storage(address, *EIP1967_ADMIN_SLOT).await?);

    let mut values = BTreeMap::new();
    values.insert("$implementation".to_string(), ContractValue::Address(implementation));
    let mut relatives = Vec::new();
    if let Some(admin) = admin {
        values.insert("$admin".to_string(), ContractValue::Address(admin));
        relatives.push(admin);
    }

    Ok(Some(ProxyDetection {
        proxy_type: Some(ManualProxyType::Eip1967),
        implementations: vec![implementation],
        relatives,
        values,
    }))
}

async fn beacon(
    provider: &dyn DiscoveryProvider,
    address: Address,
) -> RpcResult<Option<ProxyDetection>> {
    let beacon = address_from_word(provider.get_storage(address, *EIP1967_BEACON_SLOT).await?);
    let Some(beacon) = beacon else { return Ok(None) };

    // the beacon holds the implementation behind `implementation()`
    let implementation = match provider
        .call(beacon, Bytes::from(IMPLEMENTATION_SELECTOR.to_vec()))
        .await
    {
        Ok(ret) => address_from_return(&ret),
        Err(err) if err.is_revert() => None,
        Err(err) => return Err(err),
    };

    let mut values = BTreeMap::new();
    values.insert("$beacon".to_string(), ContractValue::Address(beacon));
    let mut implementations = Vec::new();
    if let Some(implementation) = implementation {
        values.insert("$implementation".to_string(), ContractValue::Address(implementation));
        implementations.push(implementation);
    }

    Ok(Some(ProxyDetection {
        proxy_type: Some(ManualProxyType::Beacon),
        implementations,
        relatives: vec![beacon],
        values,
    }))
}

async fn uups(
    provider: &dyn DiscoveryProvider,
    address: Address,
) -> RpcResult<Option<ProxyDetection>> {
    let implementation =
        address_from_word(provider.get_storage(address, *EIP1822_LOGIC_SLOT).await?);
    let Some(implementation) = implementation else { return Ok(None) };

    Ok(Some(ProxyDetection {
        proxy_type: Some(ManualProxyType::Uups),
        implementations: vec![implementation],
        relatives: Vec::new(),
        values: BTreeMap::from([(
            "$implementation".to_string(),
            ContractValue::Address(implementation),
        )]),
    }))
}

async fn gnosis_safe(
    provider: &dyn DiscoveryProvider,
    address: Address,
) -> RpcResult<Option<ProxyDetection>> {
    // the singleton lives in slot 0 and is echoed by `masterCopy()`
    let singleton = address_from_word(provider.get_storage(address, H256::zero()).await?);
    let Some(singleton) = singleton else { return Ok(None) };

    let master_copy = match provider.call(address, Bytes::from(MASTER_COPY_SELECTOR.to_vec())).await
    {
        Ok(ret) => address_from_return(&ret),
        Err(err) if err.is_revert() => None,
        Err(err) => return Err(err),
    };
    if master_copy != Some(singleton) {
        return Ok(None)
    }

    Ok(Some(ProxyDetection {
        proxy_type: Some(ManualProxyType::GnosisSafe),
        implementations: vec![singleton],
        relatives: Vec::new(),
        values: BTreeMap::from([(
            "$masterCopy".to_string(),
            ContractValue::Address(singleton),
        )]),
    }))
}

fn address_from_word(word: H256) -> Option<Address> {
    if U256::from(word.as_bytes()).is_zero() {
        return None
    }
    Some(Address::from_slice(&word.as_bytes()[12..]))
}

fn address_from_return(ret: &Bytes) -> Option<Address> {
    if ret.len() < 32 {
        return None
    }
    address_from_word(H256::from_slice(&ret[..32]))
}
