//! Process-wide endpoint configuration, shared read-only across every
//! connection a node hosts (§9: the stateless-reset key in particular must
//! not rotate while any CID issued under it could still be live at a peer).

use std::sync::Arc;

use crate::transport_parameters::TransportParameters;

pub const QUIC_VERSION_1: u32 = 0x0000_0001;

/// Minimum CRYPTO-stream buffer per encryption level, §4.6.
pub const MIN_CRYPTO_BUFFER_BYTES: u64 = 4096;

#[derive(Clone)]
pub struct EndpointConfig {
    pub static_reset_key: [u8; 32],
    pub default_transport_parameters: TransportParameters,
    pub max_buffered_crypto_bytes: u64,
    pub supported_versions: Vec<u32>,
}

impl EndpointConfig {
    pub fn new(static_reset_key: [u8; 32]) -> Self {
        Self {
            static_reset_key,
            default_transport_parameters: TransportParameters::default(),
            max_buffered_crypto_bytes: MIN_CRYPTO_BUFFER_BYTES,
            supported_versions: vec![QUIC_VERSION_1],
        }
    }

    pub fn with_transport_parameters(mut self, params: TransportParameters) -> Self {
        self.default_transport_parameters = params;
        self
    }

    pub fn with_max_buffered_crypto_bytes(mut self, bytes: u64) -> Self {
        self.max_buffered_crypto_bytes = bytes.max(MIN_CRYPTO_BUFFER_BYTES);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_buffered_crypto_bytes_floors_to_the_spec_minimum() {
        let config = EndpointConfig::new([0; 32]).with_max_buffered_crypto_bytes(10);
        assert_eq!(config.max_buffered_crypto_bytes, MIN_CRYPTO_BUFFER_BYTES);
    }

    #[test]
    fn supports_version_1_by_default() {
        let config = EndpointConfig::new([0; 32]);
        assert!(config.supported_versions.contains(&QUIC_VERSION_1));
    }
}
