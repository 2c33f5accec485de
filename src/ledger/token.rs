//! SYNTH token ledger and epoch machine
//!
//! Fixed-supply balance ledger with its own coherence density counter and
//! the four-stage epoch enum. The ledger is a plain struct owned by the
//! registry's locked state so a validation can mint and advance the epoch
//! inside the same atomic unit as the discovery mutation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Fixed supply cap: 90 trillion whole SYNTH. Never minted past, never
/// silently clamped.
pub const TOTAL_SUPPLY: u128 = 90_000_000_000_000;

/// Allocation minted to the owner/treasury at genesis. The remainder is
/// mintable as discovery rewards until the cap is reached.
pub const FOUNDERS_ALLOCATION: u128 = TOTAL_SUPPLY / 2;

/// Default coherence density required to LEAVE each non-terminal epoch:
/// [Founders→Pioneer, Pioneer→Public, Public→Ecosystem].
pub const DEFAULT_EPOCH_THRESHOLDS: [u64; 3] = [1_000, 100_000, 10_000_000];

/// Ordered network epochs. Monotonically advanced, terminal at Ecosystem.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum EpochState {
    Founders,
    Pioneer,
    Public,
    Ecosystem,
}

impl EpochState {
    /// Wire index, matching the original enum numbering (Founders = 0).
    pub fn as_index(self) -> u8 {
        match self {
            EpochState::Founders => 0,
            EpochState::Pioneer => 1,
            EpochState::Public => 2,
            EpochState::Ecosystem => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EpochState::Founders => "Founders",
            EpochState::Pioneer => "Pioneer",
            EpochState::Public => "Public",
            EpochState::Ecosystem => "Ecosystem",
        }
    }

    /// The epoch after this one, or None at the terminal Ecosystem stage.
    pub fn next(self) -> Option<EpochState> {
        match self {
            EpochState::Founders => Some(EpochState::Pioneer),
            EpochState::Pioneer => Some(EpochState::Public),
            EpochState::Public => Some(EpochState::Ecosystem),
            EpochState::Ecosystem => None,
        }
    }
}

/// Fixed-supply token ledger: balances, density counter, epoch machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenLedger {
    /// Owner/treasury address — may authorize distributors and adjust
    /// epoch thresholds.
    owner: String,

    /// Mapping: address -> whole-SYNTH balance
    balances: HashMap<String, u128>,

    /// Total SYNTH ever minted (genesis allocation included). Bounded by
    /// TOTAL_SUPPLY.
    total_minted: u128,

    /// Addresses permitted to request reward mints and density updates.
    distributors: HashSet<String>,

    /// Running sum of density scores of all validated discoveries.
    /// Advanced exclusively via update_coherence_density.
    coherence_density: u64,

    /// Current epoch. Non-decreasing; strictly a function of
    /// coherence_density given the threshold table.
    current_epoch: EpochState,

    /// Density required to leave each non-terminal epoch.
    epoch_thresholds: [u64; 3],
}

impl TokenLedger {
    /// Genesis: mint the founders allocation to the owner. No other
    /// minting happens outside mint().
    pub fn new(owner: String) -> Self {
        let mut balances = HashMap::new();
        balances.insert(owner.clone(), FOUNDERS_ALLOCATION);
        Self {
            owner,
            balances,
            total_minted: FOUNDERS_ALLOCATION,
            distributors: HashSet::new(),
            coherence_density: 0,
            current_epoch: EpochState::Founders,
            epoch_thresholds: DEFAULT_EPOCH_THRESHOLDS,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn balance_of(&self, address: &str) -> u128 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn total_minted(&self) -> u128 {
        self.total_minted
    }

    pub fn coherence_density(&self) -> u64 {
        self.coherence_density
    }

    pub fn current_epoch(&self) -> EpochState {
        self.current_epoch
    }

    /// Density required to leave the given epoch (None at Ecosystem).
    pub fn threshold_to_leave(&self, epoch: EpochState) -> Option<u64> {
        match epoch {
            EpochState::Ecosystem => None,
            e => Some(self.epoch_thresholds[e.as_index() as usize]),
        }
    }

    pub fn is_distributor(&self, address: &str) -> bool {
        self.distributors.contains(address)
    }

    fn require_owner(&self, caller: &str) -> Result<(), LedgerError> {
        if caller == self.owner {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(caller.to_string()))
        }
    }

    fn require_distributor(&self, caller: &str) -> Result<(), LedgerError> {
        if caller == self.owner || self.distributors.contains(caller) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(caller.to_string()))
        }
    }

    /// Grant the reward-mint capability to an address (owner only).
    pub fn authorize_distributor(&mut self, caller: &str, address: &str) -> Result<(), LedgerError> {
        self.require_owner(caller)?;
        self.distributors.insert(address.to_string());
        tracing::info!("🔑 Distributor authorized: {}", address);
        Ok(())
    }

    /// Check a prospective mint against the cap without applying it.
    /// Used to front-load all fallible checks of a validation so the
    /// whole operation applies or nothing does.
    pub fn can_mint(&self, amount: u128) -> Result<(), LedgerError> {
        if self.total_minted + amount > TOTAL_SUPPLY {
            return Err(LedgerError::SupplyExceeded {
                requested: amount,
                minted: self.total_minted,
                cap: TOTAL_SUPPLY,
            });
        }
        Ok(())
    }

    /// Mint new SYNTH to an address. Caller must be the owner or an
    /// authorized distributor; a mint past the cap fails whole.
    pub fn mint(&mut self, caller: &str, to: &str, amount: u128) -> Result<(), LedgerError> {
        self.require_distributor(caller)?;
        self.can_mint(amount)?;
        *self.balances.entry(to.to_string()).or_insert(0) += amount;
        self.total_minted += amount;
        Ok(())
    }

    /// Narrow transfer interface over the balance ledger.
    pub fn transfer(&mut self, from: &str, to: &str, amount: u128) -> Result<(), LedgerError> {
        let have = self.balance_of(from);
        if have < amount {
            return Err(LedgerError::InsufficientBalance { have, need: amount });
        }
        *self.balances.get_mut(from).unwrap() -= amount;
        *self.balances.entry(to.to_string()).or_insert(0) += amount;
        Ok(())
    }

    /// Advance the density counter and cascade the epoch machine.
    /// Called once per validated discovery. Returns the epochs advanced
    /// into (empty when no threshold was crossed).
    ///
    /// Cascading: a single update that crosses several thresholds walks
    /// the machine to the highest qualifying epoch in the same call, so
    /// current_epoch is a pure function of the accumulated density at
    /// every observation point.
    pub fn update_coherence_density(
        &mut self,
        caller: &str,
        delta: u64,
    ) -> Result<Vec<EpochState>, LedgerError> {
        self.require_distributor(caller)?;
        self.coherence_density += delta;
        Ok(self.cascade_epochs())
    }

    /// Change the density threshold for leaving a non-terminal epoch
    /// (owner only). Lowering a threshold may immediately advance the
    /// epoch; it never demotes one.
    pub fn set_epoch_threshold(
        &mut self,
        caller: &str,
        epoch: EpochState,
        threshold: u64,
    ) -> Result<Vec<EpochState>, LedgerError> {
        self.require_owner(caller)?;
        if epoch == EpochState::Ecosystem {
            return Err(LedgerError::OutOfRange {
                value: epoch.as_index() as u64,
                max: EpochState::Public.as_index() as u64,
            });
        }
        self.epoch_thresholds[epoch.as_index() as usize] = threshold;
        tracing::info!("⚙️ Threshold to leave {} set to {}", epoch.name(), threshold);
        Ok(self.cascade_epochs())
    }

    fn cascade_epochs(&mut self) -> Vec<EpochState> {
        let mut advanced = Vec::new();
        while let Some(threshold) = self.threshold_to_leave(self.current_epoch) {
            if self.coherence_density < threshold {
                break;
            }
            // next() is Some whenever threshold_to_leave() is
            let next = self.current_epoch.next().unwrap();
            tracing::info!(
                "🌅 Epoch advanced: {} → {} (density {})",
                self.current_epoch.name(),
                next.name(),
                self.coherence_density
            );
            self.current_epoch = next;
            advanced.push(next);
        }
        advanced
    }

    /// Pure lookup: the highest epoch a density score qualifies for under
    /// the current threshold table. Does not touch the machine.
    pub fn qualified_epoch(&self, density_score: u64) -> EpochState {
        let mut epoch = EpochState::Founders;
        while let Some(threshold) = self.threshold_to_leave(epoch) {
            if density_score < threshold {
                break;
            }
            epoch = epoch.next().unwrap();
        }
        epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> TokenLedger {
        TokenLedger::new("treasury".to_string())
    }

    #[test]
    fn test_genesis_allocation() {
        let t = ledger();
        assert_eq!(t.balance_of("treasury"), FOUNDERS_ALLOCATION);
        assert_eq!(t.total_minted(), FOUNDERS_ALLOCATION);
        assert_eq!(t.current_epoch(), EpochState::Founders);
        assert_eq!(t.coherence_density(), 0);
    }

    #[test]
    fn test_mint_requires_capability() {
        let mut t = ledger();
        assert_eq!(
            t.mint("mallory", "mallory", 1),
            Err(LedgerError::Unauthorized("mallory".to_string()))
        );
        t.authorize_distributor("treasury", "registry").unwrap();
        t.mint("registry", "alice", 100).unwrap();
        assert_eq!(t.balance_of("alice"), 100);
    }

    #[test]
    fn test_mint_past_cap_fails_whole() {
        let mut t = ledger();
        let headroom = TOTAL_SUPPLY - t.total_minted();
        // One token too many: rejected, nothing minted
        let err = t.mint("treasury", "alice", headroom + 1).unwrap_err();
        assert!(matches!(err, LedgerError::SupplyExceeded { .. }));
        assert_eq!(t.balance_of("alice"), 0);
        assert_eq!(t.total_minted(), FOUNDERS_ALLOCATION);
        // Exactly to the cap: fine
        t.mint("treasury", "alice", headroom).unwrap();
        assert_eq!(t.total_minted(), TOTAL_SUPPLY);
        assert!(matches!(
            t.mint("treasury", "alice", 1),
            Err(LedgerError::SupplyExceeded { .. })
        ));
    }

    #[test]
    fn test_transfer() {
        let mut t = ledger();
        t.transfer("treasury", "bob", 500).unwrap();
        assert_eq!(t.balance_of("bob"), 500);
        assert_eq!(t.balance_of("treasury"), FOUNDERS_ALLOCATION - 500);
        assert_eq!(
            t.transfer("bob", "carol", 501),
            Err(LedgerError::InsufficientBalance { have: 500, need: 501 })
        );
    }

    #[test]
    fn test_epoch_advances_exactly_at_threshold() {
        let mut t = ledger();
        t.set_epoch_threshold("treasury", EpochState::Founders, 1000).unwrap();

        let advanced = t.update_coherence_density("treasury", 999).unwrap();
        assert!(advanced.is_empty());
        assert_eq!(t.current_epoch(), EpochState::Founders);

        // Reaching exactly 1000 advances Founders → Pioneer, exactly once
        let advanced = t.update_coherence_density("treasury", 1).unwrap();
        assert_eq!(advanced, vec![EpochState::Pioneer]);
        assert_eq!(t.current_epoch(), EpochState::Pioneer);

        // Further density below the next threshold does nothing
        let advanced = t.update_coherence_density("treasury", 50).unwrap();
        assert!(advanced.is_empty());
        assert_eq!(t.current_epoch(), EpochState::Pioneer);
    }

    #[test]
    fn test_epoch_cascades_across_multiple_thresholds() {
        let mut t = ledger();
        // One update that clears Founders, Pioneer AND Public thresholds
        let advanced = t
            .update_coherence_density("treasury", 10_000_000)
            .unwrap();
        assert_eq!(
            advanced,
            vec![EpochState::Pioneer, EpochState::Public, EpochState::Ecosystem]
        );
        assert_eq!(t.current_epoch(), EpochState::Ecosystem);

        // Ecosystem is terminal
        let advanced = t.update_coherence_density("treasury", u64::MAX / 2).unwrap();
        assert!(advanced.is_empty());
        assert_eq!(t.current_epoch(), EpochState::Ecosystem);
    }

    #[test]
    fn test_lowering_threshold_advances_but_never_demotes() {
        let mut t = ledger();
        t.update_coherence_density("treasury", 500).unwrap();
        assert_eq!(t.current_epoch(), EpochState::Founders);

        // Lowering the Founders threshold below current density advances
        let advanced = t.set_epoch_threshold("treasury", EpochState::Founders, 400).unwrap();
        assert_eq!(advanced, vec![EpochState::Pioneer]);

        // Raising it back does not demote
        t.set_epoch_threshold("treasury", EpochState::Founders, 1_000_000).unwrap();
        assert_eq!(t.current_epoch(), EpochState::Pioneer);
    }

    #[test]
    fn test_qualified_epoch_is_pure() {
        let t = ledger();
        assert_eq!(t.qualified_epoch(0), EpochState::Founders);
        assert_eq!(t.qualified_epoch(999), EpochState::Founders);
        assert_eq!(t.qualified_epoch(1_000), EpochState::Pioneer);
        assert_eq!(t.qualified_epoch(100_000), EpochState::Public);
        assert_eq!(t.qualified_epoch(10_000_000), EpochState::Ecosystem);
        assert_eq!(t.qualified_epoch(u64::MAX), EpochState::Ecosystem);
        // Lookup never moved the machine
        assert_eq!(t.current_epoch(), EpochState::Founders);
    }

    #[test]
    fn test_density_updates_require_capability() {
        let mut t = ledger();
        assert!(matches!(
            t.update_coherence_density("mallory", 10),
            Err(LedgerError::Unauthorized(_))
        ));
        assert_eq!(t.coherence_density(), 0);
    }
}
