//! Device-blob kind names and normalization.
//!
//! A blob kind arrives in one of three spellings:
//!
//! - the canonical textual name (`usb`, `input.i8042`, ...);
//! - the numeric form `device.<id>` used by the snapshot frame;
//! - a legacy alias from before the kind table stabilized
//!   (`usb.uhci`, or `device.5` carrying a `PCIB`-tagged payload).
//!
//! All three normalize to the canonical name on output. Unknown kinds —
//! numeric ids this build does not recognize, or arbitrary strings — pass
//! through untouched so snapshots from newer builds survive a round trip.

use std::collections::HashMap;

use super::state::peek_device_id;

/// Numeric device-class id for the legacy whole-PCI blob.
const PCI_LEGACY_NUMERIC_ID: u32 = 5;

/// Device id embedded in legacy PCI config blobs.
pub const PCI_LEGACY_DEVICE_ID: [u8; 4] = *b"PCIB";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalKind {
    Usb,
    InputI8042,
    InputVirtio,
    AudioHda,
    AudioVirtioSnd,
    PciCfg,
    NetE1000,
    NetStack,
}

impl CanonicalKind {
    /// Fixed registry order; device-save ordering within a snapshot
    /// follows this.
    pub const REGISTRY: [CanonicalKind; 8] = [
        CanonicalKind::Usb,
        CanonicalKind::InputI8042,
        CanonicalKind::InputVirtio,
        CanonicalKind::AudioHda,
        CanonicalKind::AudioVirtioSnd,
        CanonicalKind::PciCfg,
        CanonicalKind::NetE1000,
        CanonicalKind::NetStack,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalKind::Usb => "usb",
            CanonicalKind::InputI8042 => "input.i8042",
            CanonicalKind::InputVirtio => "input.virtio",
            CanonicalKind::AudioHda => "audio.hda",
            CanonicalKind::AudioVirtioSnd => "audio.virtio_snd",
            CanonicalKind::PciCfg => "pci.cfg",
            CanonicalKind::NetE1000 => "net.e1000",
            CanonicalKind::NetStack => "net.stack",
        }
    }

    pub fn numeric_id(self) -> u32 {
        match self {
            CanonicalKind::Usb => 1,
            CanonicalKind::InputI8042 => 2,
            CanonicalKind::AudioHda => 3,
            CanonicalKind::AudioVirtioSnd => 4,
            CanonicalKind::NetE1000 => 6,
            CanonicalKind::NetStack => 7,
            CanonicalKind::PciCfg => 14,
            CanonicalKind::InputVirtio => 24,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::REGISTRY.iter().copied().find(|k| k.name() == name)
    }

    pub fn from_numeric(id: u32) -> Option<Self> {
        Self::REGISTRY.iter().copied().find(|k| k.numeric_id() == id)
    }
}

/// Formats the numeric (`device.<id>`) spelling of a kind.
pub fn numeric_kind_name(id: u32) -> String {
    format!("device.{id}")
}

/// Parses the numeric spelling. Only canonical decimal is accepted; any
/// other shape is an unknown kind, not an error.
pub fn parse_numeric_kind(kind: &str) -> Option<u32> {
    let digits = kind.strip_prefix("device.")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedKind {
    Canonical(CanonicalKind),
    /// Passed through byte-identical; this build does not interpret it.
    Unknown(String),
}

impl NormalizedKind {
    /// The merge/dedup key and output spelling for this kind.
    pub fn key(&self) -> &str {
        match self {
            NormalizedKind::Canonical(kind) => kind.name(),
            NormalizedKind::Unknown(kind) => kind,
        }
    }
}

/// Input-spelling precedence: when several entries normalize to the same
/// canonical device, an already-canonical spelling beats the numeric
/// form, which beats a legacy alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum KindForm {
    LegacyAlias,
    Numeric,
    Canonical,
}

fn normalize_detailed(kind: &str, data: &[u8]) -> (NormalizedKind, KindForm) {
    if let Some(canonical) = CanonicalKind::from_name(kind) {
        return (NormalizedKind::Canonical(canonical), KindForm::Canonical);
    }
    if let Some(id) = parse_numeric_kind(kind) {
        if id == PCI_LEGACY_NUMERIC_ID {
            // A legacy whole-PCI blob is only meaningful when the payload
            // identifies itself as a PCI config snapshot.
            if peek_device_id(data) == Some(PCI_LEGACY_DEVICE_ID) {
                return (
                    NormalizedKind::Canonical(CanonicalKind::PciCfg),
                    KindForm::LegacyAlias,
                );
            }
            return (
                NormalizedKind::Unknown(kind.to_string()),
                KindForm::Numeric,
            );
        }
        if let Some(canonical) = CanonicalKind::from_numeric(id) {
            return (NormalizedKind::Canonical(canonical), KindForm::Numeric);
        }
        return (NormalizedKind::Unknown(kind.to_string()), KindForm::Numeric);
    }
    match kind {
        "usb.uhci" | "usb.ehci" | "usb.xhci" => (
            NormalizedKind::Canonical(CanonicalKind::Usb),
            KindForm::LegacyAlias,
        ),
        _ => (
            NormalizedKind::Unknown(kind.to_string()),
            KindForm::LegacyAlias,
        ),
    }
}

/// Normalizes one kind spelling. `data` is consulted only for the legacy
/// `device.5` + `PCIB` probe.
pub fn normalize_kind(kind: &str, data: &[u8]) -> NormalizedKind {
    normalize_detailed(kind, data).0
}

/// One device blob in the list-of-kind-bytes transport form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBlob {
    pub kind: String,
    pub data: Vec<u8>,
}

impl DeviceBlob {
    pub fn new(kind: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

fn ordered_output(
    mut by_key: HashMap<String, DeviceBlob>,
    unknown_order: Vec<String>,
) -> Vec<DeviceBlob> {
    let mut out = Vec::with_capacity(by_key.len());
    for kind in CanonicalKind::REGISTRY {
        if let Some(blob) = by_key.remove(kind.name()) {
            out.push(blob);
        }
    }
    for key in unknown_order {
        if let Some(blob) = by_key.remove(&key) {
            out.push(blob);
        }
    }
    out
}

/// Merges the three save-side blob tiers.
///
/// Later tiers override earlier ones for the same canonical device;
/// unknown kinds are preserved additively. Output is deterministic:
/// registry order for known kinds, then unknown kinds in first-appearance
/// order, all spelled canonically.
pub fn merge_blob_tiers(
    cached: &[DeviceBlob],
    fresh: &[DeviceBlob],
    coordinator: &[DeviceBlob],
) -> Vec<DeviceBlob> {
    let mut by_key: HashMap<String, DeviceBlob> = HashMap::new();
    let mut unknown_order = Vec::new();

    for blob in cached.iter().chain(fresh).chain(coordinator) {
        let normalized = normalize_kind(&blob.kind, &blob.data);
        let key = normalized.key().to_string();
        if matches!(normalized, NormalizedKind::Unknown(_)) && !by_key.contains_key(&key) {
            unknown_order.push(key.clone());
        }
        by_key.insert(key.clone(), DeviceBlob::new(key, blob.data.clone()));
    }

    ordered_output(by_key, unknown_order)
}

/// Collapses a restore-side blob list to one entry per device.
///
/// When canonical and legacy spellings of the same device are both
/// present, the canonical entry wins regardless of list order; entries of
/// equal precedence resolve to the last occurrence.
pub fn collapse_for_restore(blobs: &[DeviceBlob]) -> Vec<DeviceBlob> {
    let mut by_key: HashMap<String, (KindForm, DeviceBlob)> = HashMap::new();
    let mut unknown_order = Vec::new();

    for blob in blobs {
        let (normalized, form) = normalize_detailed(&blob.kind, &blob.data);
        let key = normalized.key().to_string();
        if matches!(normalized, NormalizedKind::Unknown(_)) && !by_key.contains_key(&key) {
            unknown_order.push(key.clone());
        }
        let entry = (form, DeviceBlob::new(key.clone(), blob.data.clone()));
        match by_key.get(&key) {
            Some((existing_form, _)) if *existing_form > form => {}
            _ => {
                by_key.insert(key, entry);
            }
        }
    }

    ordered_output(
        by_key.into_iter().map(|(k, (_, b))| (k, b)).collect(),
        unknown_order,
    )
}
