use serde::{Deserialize, Serialize};
use std::ops::BitOr;

macro_rules! snap_flags {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* const $flag:ident = $bit:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: Self = Self($bit); )*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn from_bits(bits: u32) -> Self {
                Self(bits)
            }

            pub const fn bits(&self) -> u32 {
                self.0
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            pub const fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

snap_flags! {
    /// Options for install and update
    pub struct InstallFlags {
        /// Install even if the snap cannot be authenticated
        const ALLOW_UNAUTHENTICATED = 1 << 0;
        /// Skip running snap hooks
        const INHIBIT_HOOKS = 1 << 1;
        /// Remove older inactive revisions after installing
        const DO_INSTALL_GC = 1 << 2;
        /// Allow installing gadget snaps
        const ALLOW_GADGET = 1 << 3;
    }
}

snap_flags! {
    /// Options for remove
    pub struct RemoveFlags {
        /// Remove every installed revision, not only the active one
        const DO_REMOVE_GC = 1 << 0;
    }
}

snap_flags! {
    /// Options for purge
    pub struct PurgeFlags {
        /// Also purge the data of the active revision
        const DO_PURGE_ACTIVE = 1 << 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_serialize_as_plain_integers() {
        let flags = InstallFlags::ALLOW_UNAUTHENTICATED | InstallFlags::DO_INSTALL_GC;
        assert_eq!(serde_json::to_string(&flags).expect("must encode"), "5");

        let decoded: RemoveFlags = serde_json::from_str("1").expect("must decode");
        assert_eq!(decoded, RemoveFlags::DO_REMOVE_GC);
    }

    #[test]
    fn unknown_bits_survive_decoding() {
        let decoded: PurgeFlags = serde_json::from_str("6").expect("must decode");
        assert_eq!(decoded.bits(), 6);
        assert!(!decoded.contains(PurgeFlags::DO_PURGE_ACTIVE));
    }

    #[test]
    fn contains_checks_every_bit() {
        let flags = InstallFlags::INHIBIT_HOOKS | InstallFlags::ALLOW_GADGET;
        assert!(flags.contains(InstallFlags::ALLOW_GADGET));
        assert!(!flags.contains(InstallFlags::ALLOW_GADGET | InstallFlags::DO_INSTALL_GC));
        assert!(InstallFlags::empty().is_empty());
    }
}
