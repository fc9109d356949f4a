//! Wallet UTXO snapshots and the transitions between two of them

use crate::rpc::types::UnspentEntry;
use crate::wallet::Utxo;
use bitcoin::Amount;
use std::collections::BTreeMap;

/// Unspent outputs keyed by outpoint (`txid:vout`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: BTreeMap<String, Utxo>,
}

impl UtxoSet {
    pub fn new() -> Self { Self::default() }

    /// Entries without an address are dropped
    pub fn from_entries(entries: impl IntoIterator<Item = UnspentEntry>) -> Self {
        entries.into_iter().filter_map(Utxo::from_entry).collect()
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn get(&self, outpoint: &str) -> Option<&Utxo> { self.entries.get(outpoint) }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> { self.entries.values() }

    pub fn for_address<'a>(&'a self, address: &'a str) -> impl Iterator<Item = &'a Utxo> + 'a {
        self.iter().filter(move |u| u.address == address)
    }

    pub fn balance(&self) -> Amount {
        self.iter().map(|u| u.amount).sum()
    }

    /// Sum of outputs with at least `min_confirmations`
    pub fn confirmed_balance(&self, min_confirmations: u64) -> Amount {
        self.iter().filter(|u| u.confirmations >= min_confirmations).map(|u| u.amount).sum()
    }

    /// Events that turn `old` into `new`, ordered by outpoint
    pub fn diff(old: &UtxoSet, new: &UtxoSet) -> Vec<UtxoEvent> {
        let mut events = Vec::new();
        for (outpoint, utxo) in &new.entries {
            match old.entries.get(outpoint) {
                None => events.push(UtxoEvent::Received(utxo.clone())),
                Some(before) if before.confirmations == 0 && utxo.confirmations > 0 => {
                    events.push(UtxoEvent::Confirmed(utxo.clone()))
                }
                Some(_) => {}
            }
        }
        for (outpoint, utxo) in &old.entries {
            if !new.entries.contains_key(outpoint) {
                events.push(UtxoEvent::Spent(utxo.clone()));
            }
        }
        events
    }
}

impl FromIterator<Utxo> for UtxoSet {
    fn from_iter<I: IntoIterator<Item = Utxo>>(iter: I) -> Self {
        Self { entries: iter.into_iter().map(|u| (u.outpoint(), u)).collect() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoEvent {
    Received(Utxo),
    /// First confirmation of an output previously seen in the mempool
    Confirmed(Utxo),
    Spent(Utxo),
}

impl UtxoEvent {
    pub fn utxo(&self) -> &Utxo {
        match self {
            UtxoEvent::Received(u) | UtxoEvent::Confirmed(u) | UtxoEvent::Spent(u) => u,
        }
    }

    pub fn address(&self) -> &str { &self.utxo().address }

    pub fn kind(&self) -> &'static str {
        match self {
            UtxoEvent::Received(_) => "received",
            UtxoEvent::Confirmed(_) => "confirmed",
            UtxoEvent::Spent(_) => "spent",
        }
    }
}
