//! Sampling-rate feedback from collector responses.
//!
//! The collector answers each delivery with a JSON rate table. The exporter
//! only forwards the body to a [`RateFeedback`]; how the rates are used for
//! sampling decisions is up to the implementor.

use crate::error::DecodeError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;

/// Entry point for rate updates carried in transport responses.
pub trait RateFeedback: Send + Sync {
    /// Parses and applies a response body.
    fn apply_rates(&self, body: &[u8]) -> Result<(), DecodeError>;
}

/// Rate table as sent by the collector, keyed by `service:<name>,env:<env>`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SamplingRates {
    #[serde(default)]
    pub rate_by_service: HashMap<String, f64>,
}

impl SamplingRates {
    /// Decodes a response body, rejecting rates outside `[0, 1]`.
    pub fn from_json(body: &[u8]) -> Result<Self, DecodeError> {
        let rates: Self = serde_json::from_slice(body)?;
        if let Some((key, rate)) = rates
            .rate_by_service
            .iter()
            .find(|(_, r)| !(0.0..=1.0).contains(*r))
        {
            return Err(DecodeError::RateOutOfRange {
                key: key.clone(),
                rate: *rate,
            });
        }
        Ok(rates)
    }
}

/// Holds the most recently applied rate table.
#[derive(Debug, Default)]
pub struct RateTable {
    rates: RwLock<HashMap<String, f64>>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rate for `service:<service>,env:<env>`, if the collector sent one.
    pub fn rate_for(&self, service: &str, env: &str) -> Option<f64> {
        let key = format!("service:{},env:{}", service, env);
        self.read().get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, f64>> {
        self.rates.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RateFeedback for RateTable {
    fn apply_rates(&self, body: &[u8]) -> Result<(), DecodeError> {
        let decoded = SamplingRates::from_json(body)?;
        let mut rates = self
            .rates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *rates = decoded.rate_by_service;
        Ok(())
    }
}
