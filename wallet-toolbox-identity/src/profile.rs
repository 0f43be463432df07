//! Profiles: XOR-derived sub-identities sharing one UMP
//! token's root material. The default profile's id is all-zeros.

use chrono::{DateTime, Utc};
use wallet_toolbox_common::xor::xor;

pub const DEFAULT_PROFILE_ID: [u8; 16] = [0u8; 16];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: [u8; 16],
    pub name: String,
    pub primary_pad: [u8; 32],
    pub presentation_pad: [u8; 32],
    pub created_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// The unnamed root profile every UMP token has implicitly.
    pub fn default_profile() -> Self {
        Self {
            id: DEFAULT_PROFILE_ID,
            name: "default".to_string(),
            primary_pad: [0u8; 32],
            presentation_pad: [0u8; 32],
            created_at: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_PROFILE_ID
    }
}

/// XORs the root primary key with a profile's pad, producing the
/// profile-scoped primary key. Profile-scoped primary/presentation
/// keys are computed by XORing the root material with the profile's
/// pads.
pub fn scoped_primary_key(root_primary_key: &[u8; 32], profile: &Profile) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&xor(root_primary_key, &profile.primary_pad));
    out
}

pub fn scoped_presentation_key(root_presentation_key: &[u8; 32], profile: &Profile) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&xor(root_presentation_key, &profile.presentation_pad));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_pads_are_identity_under_xor() {
        let root = [0x5Au8; 32];
        let scoped = scoped_primary_key(&root, &Profile::default_profile());
        assert_eq!(scoped, root);
    }

    #[test]
    fn non_default_profile_scopes_to_a_different_key() {
        let root = [0x5Au8; 32];
        let mut profile = Profile::default_profile();
        profile.id = [1u8; 16];
        profile.primary_pad = [0xFFu8; 32];
        let scoped = scoped_primary_key(&root, &profile);
        assert_ne!(scoped, root);
    }
}
