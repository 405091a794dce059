//! Feature profile composition.
//!
//! [`FeatureProfiles`] is the validated selection taken from configuration;
//! [`FeatureRegistry`] is the per-transport bookkeeping that answers
//! "is this action supported right now".

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use tracing::{debug, info};

use crate::application::ports::Transport;
use crate::domain::{Action, FeatureSet, UnknownFeature};
use crate::shared::errors::TransportError;

/// Feature profiles enabled for a server. `Core` is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureProfiles {
    enabled: Vec<FeatureSet>,
}

impl FeatureProfiles {
    pub fn core_only() -> Self {
        Self {
            enabled: vec![FeatureSet::Core],
        }
    }

    pub fn new(features: impl IntoIterator<Item = FeatureSet>) -> Self {
        let mut enabled: Vec<FeatureSet> = features.into_iter().collect();
        enabled.push(FeatureSet::Core);
        enabled.sort();
        enabled.dedup();
        Self { enabled }
    }

    /// Parse configuration names. The first unknown name fails the whole set.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, UnknownFeature> {
        let features = names
            .iter()
            .map(|name| name.as_ref().parse::<FeatureSet>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(features))
    }

    /// Every known profile.
    pub fn all() -> Self {
        Self::new(FeatureSet::ALL.iter().copied())
    }

    /// Canonical order, `Core` first.
    pub fn enabled(&self) -> &[FeatureSet] {
        &self.enabled
    }

    pub fn contains(&self, feature: FeatureSet) -> bool {
        self.enabled.contains(&feature)
    }

    pub fn supports(&self, action: Action) -> bool {
        action.feature_sets().any(|f| self.contains(f))
    }

    pub fn register_with(&self, transport: &dyn Transport) -> Result<(), TransportError> {
        for feature in &self.enabled {
            transport.register_feature(*feature)?;
            debug!(%feature, "Feature profile registered");
        }
        info!(
            features = ?self.enabled.iter().map(FeatureSet::config_name).collect::<Vec<_>>(),
            "Feature profiles composed"
        );
        Ok(())
    }
}

impl Default for FeatureProfiles {
    fn default() -> Self {
        Self::core_only()
    }
}

/// Registered profiles of one transport instance.
///
/// Registration closes once the transport starts listening.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    registered: DashSet<FeatureSet>,
    listening: AtomicBool,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, feature: FeatureSet) -> Result<(), TransportError> {
        if self.listening.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyListening);
        }
        self.registered.insert(feature);
        Ok(())
    }

    pub fn mark_listening(&self) {
        self.listening.store(true, Ordering::SeqCst);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn supports(&self, action: Action) -> bool {
        action.feature_sets().any(|f| self.registered.contains(&f))
    }

    /// `Ok` iff some owning profile of `action` is registered.
    pub fn check(&self, action: Action) -> Result<(), TransportError> {
        if self.supports(action) {
            Ok(())
        } else {
            Err(TransportError::UnsupportedFeature {
                action,
                feature: action.primary_feature(),
            })
        }
    }

    pub fn registered(&self) -> Vec<FeatureSet> {
        let mut features: Vec<_> = self.registered.iter().map(|f| *f).collect();
        features.sort();
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_is_always_enabled() {
        let profiles = FeatureProfiles::from_names(&["SmartCharging"]).unwrap();
        assert_eq!(
            profiles.enabled(),
            &[FeatureSet::Core, FeatureSet::SmartCharging]
        );
        assert_eq!(FeatureProfiles::from_names::<&str>(&[]).unwrap().enabled(), &[FeatureSet::Core]);
    }

    #[test]
    fn names_are_validated() {
        let err = FeatureProfiles::from_names(&["Core", "Reservation"]).unwrap_err();
        assert_eq!(err, UnknownFeature("Reservation".into()));
    }

    #[test]
    fn canonical_order_and_dedup() {
        let profiles =
            FeatureProfiles::from_names(&["SecuritySpec16", "core", "RemoteTrigger", "Core"])
                .unwrap();
        assert_eq!(
            profiles.enabled(),
            &[
                FeatureSet::Core,
                FeatureSet::RemoteTrigger,
                FeatureSet::ExtendedSecurity
            ]
        );
    }

    #[test]
    fn shared_action_supported_by_either_owner() {
        let profiles = FeatureProfiles::new([FeatureSet::ExtendedSecurity]);
        assert!(profiles.supports(Action::InstallCertificate));
        assert!(!profiles.supports(Action::Get15118EVCertificate));
    }

    #[test]
    fn registry_rejects_late_registration() {
        let registry = FeatureRegistry::new();
        registry.register(FeatureSet::Core).unwrap();
        registry.mark_listening();
        assert!(matches!(
            registry.register(FeatureSet::SmartCharging),
            Err(TransportError::AlreadyListening)
        ));
        assert_eq!(registry.registered(), vec![FeatureSet::Core]);
    }

    #[test]
    fn registry_check_names_the_missing_profile() {
        let registry = FeatureRegistry::new();
        registry.register(FeatureSet::Core).unwrap();
        registry.register(FeatureSet::SmartCharging).unwrap();
        assert!(registry.check(Action::SetChargingProfile).is_ok());
        match registry.check(Action::UpdateFirmware) {
            Err(TransportError::UnsupportedFeature { action, feature }) => {
                assert_eq!(action, Action::UpdateFirmware);
                assert_eq!(feature, FeatureSet::FirmwareManagement);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
