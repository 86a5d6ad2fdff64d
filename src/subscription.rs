use crate::error::{ReadClientError, Result};
use crate::message::SignedData;
use crate::types::{parse_tx_types, TxType};
use std::collections::HashSet;

/// Client-side record of the active subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionState {
    // Unique; existing addresses first, new ones appended in request order.
    addresses: Vec<String>,
    signed_data: SignedData,
    // Filter of the last successful subscribe, kept for resubscription.
    tx_types: Vec<TxType>,
    subscribed: bool,
}

/// A validated subscribe request merged against the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Full merged address set to transmit.
    pub addresses: Vec<String>,
    /// Requested addresses that were not subscribed yet.
    pub delta: Vec<String>,
    pub signed_data: SignedData,
    pub tx_types: Vec<TxType>,
}

impl SubscriptionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn signed_data(&self) -> &SignedData {
        &self.signed_data
    }

    pub fn tx_types(&self) -> &[TxType] {
        &self.tx_types
    }

    /// Validates a subscribe call and merges it with the addresses on file.
    ///
    /// Signed data replaces the stored mapping when given and reuses it
    /// otherwise. Nothing is changed until [`commit`](Self::commit).
    pub fn prepare<A, T>(
        &self,
        addresses: &[A],
        signed_data: Option<SignedData>,
        tx_types: &[T],
    ) -> Result<SubscriptionRequest>
    where
        A: AsRef<str>,
        T: AsRef<str>,
    {
        if addresses.is_empty() {
            return Err(ReadClientError::invalid_argument("addrs"));
        }
        if addresses.iter().any(|addr| addr.as_ref().is_empty()) {
            return Err(ReadClientError::invalid_argument("addrs"));
        }
        if let Some(signed_data) = &signed_data {
            if signed_data.keys().any(|addr| addr.is_empty()) {
                return Err(ReadClientError::invalid_argument("signed_addrs"));
            }
        }
        let tx_types = parse_tx_types(tx_types)?;

        let mut seen: HashSet<&str> = self.addresses.iter().map(String::as_str).collect();
        let mut delta = Vec::new();
        for addr in addresses {
            let addr = addr.as_ref();
            if seen.insert(addr) {
                delta.push(addr.to_string());
            }
        }

        let mut merged = self.addresses.clone();
        merged.extend(delta.iter().cloned());

        Ok(SubscriptionRequest {
            addresses: merged,
            delta,
            signed_data: signed_data.unwrap_or_else(|| self.signed_data.clone()),
            tx_types,
        })
    }

    /// Records a request that was successfully transmitted.
    pub fn commit(&mut self, request: SubscriptionRequest) {
        self.addresses = request.addresses;
        self.signed_data = request.signed_data;
        self.tx_types = request.tx_types;
        self.subscribed = true;
    }

    /// Addresses to carry in the unsubscribe directive.
    pub fn unsubscribe_addresses(&self) -> Result<Vec<String>> {
        if !self.subscribed {
            return Err(ReadClientError::NotSubscribed);
        }
        Ok(self.addresses.clone())
    }

    pub fn reset(&mut self) {
        self.addresses.clear();
        self.signed_data.clear();
        self.tx_types.clear();
        self.subscribed = false;
    }
}
