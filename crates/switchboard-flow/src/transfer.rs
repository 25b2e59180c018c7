use switchboard_core::config::{TelephonyConfig, PUBLIC_NETWORK_SENTINEL};
use switchboard_core::types::{TransferTarget, Transport};

/// How calls to the main number leave the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrunkRoute {
    /// Send main-number transfers over this private trunk.
    Private(String),
    /// Never use a private trunk.
    PublicOnly,
}

impl TrunkRoute {
    /// Parse a configured trunk value; the `PSTN` sentinel (any case) means public only.
    pub fn parse(trunk: &str) -> Self {
        let trunk = trunk.trim();
        if trunk.is_empty() || trunk.eq_ignore_ascii_case(PUBLIC_NETWORK_SENTINEL) {
            Self::PublicOnly
        } else {
            Self::Private(trunk.to_string())
        }
    }
}

/// Chooses between private-trunk and public-network bridging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPolicy {
    main_number: String,
    trunk: TrunkRoute,
}

impl TransferPolicy {
    pub fn new(main_number: impl Into<String>, trunk: &str) -> Self {
        Self {
            main_number: main_number.into(),
            trunk: TrunkRoute::parse(trunk),
        }
    }

    pub fn from_config(config: &TelephonyConfig) -> Self {
        Self::new(config.main_number.clone(), &config.trunk)
    }

    pub fn main_number(&self) -> &str {
        &self.main_number
    }

    pub fn trunk(&self) -> &TrunkRoute {
        &self.trunk
    }

    /// Calls back into our own number stay on the private trunk when one is
    /// configured; everything else is dialed over the public network.
    pub fn decide(&self, destination: &str) -> TransferTarget {
        let destination = destination.trim();
        match &self.trunk {
            TrunkRoute::Private(trunk) if destination == self.main_number => TransferTarget {
                target: trunk.clone(),
                transport: Transport::PrivateTrunk,
            },
            _ => TransferTarget {
                target: destination.to_string(),
                transport: Transport::PublicNetwork,
            },
        }
    }
}
