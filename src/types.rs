//! Newtypes and enumerations shared by the polling, build and harness layers.

use std::fmt;
use std::num::ParseIntError;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps the given value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the wrapped string.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(
    /// Provider zone that scopes most resource operations (for example `is1a`).
    Zone
);

/// Identifier assigned by the provider when a resource is created.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` for the zero value the provider never assigns.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for ResourceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for ResourceId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declares a string-backed enum with a catch-all variant for values the
/// provider reports but this crate does not know about.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// Value outside the known enumeration, kept verbatim.
            Other(String),
        }

        impl $name {
            /// Returns the wire representation.
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $wire, )+
                    Self::Other(value) => value.as_str(),
                }
            }

            /// Returns `true` when the value belongs to the known enumeration.
            #[must_use]
            pub const fn is_known(&self) -> bool {
                !matches!(self, Self::Other(_))
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                match value {
                    $( $wire => Self::$variant, )+
                    other => Self::Other(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from(value.as_str())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_owned()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    /// Power state of an appliance-backed resource such as a server.
    InstanceStatus {
        /// Status not reported yet.
        Unknown => "",
        /// Running.
        Up => "up",
        /// Shutting down or being scrubbed.
        Cleaning => "cleaning",
        /// Powered off.
        Down => "down",
    }
);

wire_enum!(
    /// Lifecycle state of any resource, independent of power state.
    Availability {
        /// Availability not reported yet.
        Unknown => "",
        /// Ready for use.
        Available => "available",
        /// Content is being uploaded.
        Uploading => "uploading",
        /// Provisioning failed.
        Failed => "failed",
        /// Being created or copied.
        Migrating => "migrating",
        /// Being transferred between zones.
        Transferring => "transferring",
        /// Retired by the provider.
        Discontinued => "discontinued",
    }
);

wire_enum!(
    /// Network interface driver presented to the guest.
    InterfaceDriver {
        /// Paravirtualised driver (default).
        VirtIo => "virtio",
        /// Emulated Intel E1000.
        E1000 => "e1000",
    }
);

impl Default for InterfaceDriver {
    fn default() -> Self {
        Self::VirtIo
    }
}

impl Default for InstanceStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Default for Availability {
    fn default() -> Self {
        Self::Unknown
    }
}

/// CPU allocation model of a server plan.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    /// Shared CPU.
    #[default]
    Standard,
    /// Dedicated CPU.
    #[serde(rename = "dedicatedcpu")]
    DedicatedCpu,
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::DedicatedCpu => f.write_str("dedicatedcpu"),
        }
    }
}

/// Hardware generation of a server plan. `0` means "any generation".
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanGeneration(u32);

impl PlanGeneration {
    /// Let the provider pick; plan resolution prefers the newest match.
    pub const DEFAULT: Self = Self(0);

    /// Wraps a generation number.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the generation number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` when no specific generation was requested.
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PlanGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage class of a disk plan.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskPlanKind {
    /// Solid state storage.
    #[default]
    Ssd,
    /// Spinning storage.
    Hdd,
}

impl fmt::Display for DiskPlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssd => f.write_str("ssd"),
            Self::Hdd => f.write_str("hdd"),
        }
    }
}

/// Bus used to connect a disk to its server.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskConnection {
    /// Paravirtualised block device.
    #[default]
    VirtIo,
    /// Emulated IDE.
    Ide,
}

/// Operating systems offered as public archives.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsType {
    /// Ubuntu LTS.
    Ubuntu,
    /// Debian stable.
    Debian,
    /// Rocky Linux.
    RockyLinux,
    /// AlmaLinux.
    AlmaLinux,
    /// FreeBSD.
    FreeBsd,
    /// Windows Server 2019.
    Windows2019,
    /// Windows Server 2022.
    Windows2022,
}

impl OsType {
    /// Every supported OS type, in display order.
    pub const ALL: [Self; 7] = [
        Self::Ubuntu,
        Self::Debian,
        Self::RockyLinux,
        Self::AlmaLinux,
        Self::FreeBsd,
        Self::Windows2019,
        Self::Windows2022,
    ];

    /// Returns `true` for families whose disks accept guest customisation
    /// (hostname, SSH keys, startup scripts).
    #[must_use]
    pub const fn is_unix(self) -> bool {
        !self.is_windows()
    }

    /// Returns `true` for Windows families.
    #[must_use]
    pub const fn is_windows(self) -> bool {
        matches!(self, Self::Windows2019 | Self::Windows2022)
    }

    /// Tags used to locate the public archive for this OS.
    #[must_use]
    pub const fn archive_tags(self) -> &'static [&'static str] {
        match self {
            Self::Ubuntu => &["current-stable", "distro-ubuntu"],
            Self::Debian => &["current-stable", "distro-debian"],
            Self::RockyLinux => &["current-stable", "distro-rocky"],
            Self::AlmaLinux => &["current-stable", "distro-alma"],
            Self::FreeBsd => &["current-stable", "distro-freebsd"],
            Self::Windows2019 => &["os-windows", "distro-ver-2019"],
            Self::Windows2022 => &["os-windows", "distro-ver-2022"],
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::RockyLinux => "rocky-linux",
            Self::AlmaLinux => "alma-linux",
            Self::FreeBsd => "free-bsd",
            Self::Windows2019 => "windows2019",
            Self::Windows2022 => "windows2022",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|os| os.name() == wanted)
            .ok_or_else(|| format!("unsupported OS type: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("up", InstanceStatus::Up)]
    #[case("down", InstanceStatus::Down)]
    #[case("", InstanceStatus::Unknown)]
    #[case("totally-unrecognized", InstanceStatus::Other(String::from("totally-unrecognized")))]
    fn instance_status_parses_wire_values(#[case] raw: &str, #[case] expected: InstanceStatus) {
        assert_eq!(InstanceStatus::from(raw), expected);
    }

    #[test]
    fn unknown_is_part_of_the_enumeration_but_other_is_not() {
        assert!(InstanceStatus::Unknown.is_known());
        assert!(!InstanceStatus::from("rebooting?").is_known());
        assert!(!Availability::from("exploded").is_known());
    }

    #[test]
    fn availability_round_trips_through_json() {
        let json = serde_json::to_string(&Availability::Migrating).expect("serialise");
        assert_eq!(json, r#""migrating""#);
        let parsed: Availability = serde_json::from_str(r#""weird""#).expect("deserialise");
        assert_eq!(parsed, Availability::Other(String::from("weird")));
    }

    #[rstest]
    #[case("ubuntu", OsType::Ubuntu)]
    #[case("Rocky-Linux", OsType::RockyLinux)]
    #[case("windows2022", OsType::Windows2022)]
    fn os_type_parses_case_insensitively(#[case] raw: &str, #[case] expected: OsType) {
        assert_eq!(raw.parse::<OsType>(), Ok(expected));
    }

    #[test]
    fn os_type_rejects_unknown_names() {
        assert!("plan9".parse::<OsType>().is_err());
    }

    #[test]
    fn resource_id_parses_and_displays() {
        let id: ResourceId = " 113000000001 ".parse().expect("parse id");
        assert_eq!(id.get(), 113_000_000_001);
        assert_eq!(id.to_string(), "113000000001");
        assert!(ResourceId::default().is_empty());
    }
}
